use serde_json::{Map, Value};

use super::Reducer;

/// Key-wise merge for objects; `new` wins on key collision. Non-object
/// operands are treated as an empty object so a `merge` field seeded with
/// `null` behaves correctly on the first update.
pub struct MergeReducer;

impl Reducer for MergeReducer {
    fn apply(&self, existing: &Value, update: &Value) -> Value {
        let mut merged = to_map(existing);
        for (key, value) in to_map(update) {
            merged.insert(key, value);
        }
        Value::Object(merged)
    }
}

fn to_map(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_keys_win_on_collision() {
        let merged = MergeReducer.apply(&json!({"a": 1, "b": 2}), &json!({"b": 3, "c": 4}));
        assert_eq!(merged, json!({"a": 1, "b": 3, "c": 4}));
    }
}

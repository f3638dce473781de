use serde_json::Value;

use super::Reducer;

/// `apply(old, new) = new`. The default reducer for any field without an
/// explicit schema entry.
pub struct OverwriteReducer;

impl Reducer for OverwriteReducer {
    fn apply(&self, _existing: &Value, update: &Value) -> Value {
        update.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_value_wins() {
        let merged = OverwriteReducer.apply(&json!(1), &json!(2));
        assert_eq!(merged, json!(2));
    }
}

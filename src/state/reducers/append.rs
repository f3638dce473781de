use serde_json::Value;

use super::Reducer;

/// List concatenation. Associative over disjoint keys: applying the same
/// update twice to different base lists never loses entries, and applying
/// two updates in either order to an empty base yields the same
/// concatenation by construction (array `+` is associative).
///
/// Non-array operands are treated as a single-element list, so an
/// `append` field can be seeded with a scalar default and still behave
/// correctly on the first update.
pub struct AppendReducer;

impl Reducer for AppendReducer {
    fn apply(&self, existing: &Value, update: &Value) -> Value {
        let mut merged = to_list(existing);
        merged.extend(to_list(update));
        Value::Array(merged)
    }
}

fn to_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn concatenates_arrays() {
        let merged = AppendReducer.apply(&json!(["a"]), &json!(["b", "c"]));
        assert_eq!(merged, json!(["a", "b", "c"]));
    }

    #[test]
    fn wraps_scalars() {
        let merged = AppendReducer.apply(&json!(null), &json!("start"));
        assert_eq!(merged, json!(["start"]));
    }

    #[test]
    fn is_associative_over_disjoint_updates() {
        let base = json!(["a"]);
        let left = AppendReducer.apply(&AppendReducer.apply(&base, &json!(["b"])), &json!(["c"]));
        let right = AppendReducer.apply(&base, &AppendReducer.apply(&json!(["b"]), &json!(["c"])));
        assert_eq!(left, right);
    }
}

//! Typed, schema-driven state: an ordered mapping from field name to
//! opaque JSON value, merged deterministically via per-field reducers.
//!
//! This generalizes the closed three-channel `messages`/`extra`/`errors`
//! state of earlier revisions into an arbitrary, author-declared schema —
//! any field name the graph's [`StateSchema`] or a node's output declares
//! is a first-class, independently-versioned piece of state.

pub mod reducers;
pub mod schema;

pub use schema::StateSchema;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::json_ext::deep_copy_value;

/// An ordered mapping from field name to opaque value. Order is insertion
/// order, preserved across `apply_update`/`restore` so iteration and
/// serialization are deterministic given the same sequence of updates.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct State {
    order: Vec<String>,
    #[serde(flatten)]
    values: FxHashMap<String, Value>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a `State` directly from a field map, in iteration order of
    /// the supplied map (callers that care about order should use
    /// `set`/`with_field` instead).
    pub fn from_map(values: FxHashMap<String, Value>) -> Self {
        let order = values.keys().cloned().collect();
        Self { order, values }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if !self.values.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.order.iter().map(move |k| (k.as_str(), &self.values[k]))
    }

    pub fn field_names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Structural deep copy: every composite value is recursively cloned so
    /// that no two `State`s share mutable backing storage. Required before
    /// handing a state overlay to a task, and before writing into a
    /// checkpoint (spec §9).
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        Self {
            order: self.order.clone(),
            values: self
                .values
                .iter()
                .map(|(k, v)| (k.clone(), deep_copy_value(v)))
                .collect(),
        }
    }

    /// Applies `update` on top of `self` using `schema` to resolve each
    /// field's reducer, returning a new, independent `State`. Deterministic
    /// given the same `(self, update, schema)` triple; deep-copies every
    /// merged value so the result never aliases `self` or `update`.
    #[must_use]
    pub fn apply_update(&self, schema: &StateSchema, update: &State) -> State {
        let mut merged = self.deep_copy();
        for (field, value) in update.fields() {
            let reducer = schema.reducer_for(field);
            let existing = merged.get(field).cloned().unwrap_or(Value::Null);
            let next = reducer.apply(&existing, value);
            merged.set(field, deep_copy_value(&next));
        }
        merged
    }

    /// Rebuilds a `State` from a checkpoint's flat `channel_values` map:
    /// every field declared by `schema` but absent from `values` is filled
    /// with its schema default; fields present in `values` but not
    /// declared by the schema are preserved verbatim (spec §4.1).
    pub fn restore(schema: &StateSchema, values: FxHashMap<String, Value>) -> Self {
        let mut state = State::from_map(values);
        for field in schema.declared_fields() {
            if !state.contains(field) {
                state.set(field.to_string(), schema.default_for(field));
            }
        }
        state
    }

    /// Flattens to a plain map, e.g. for writing `channel_values` into a
    /// [`crate::checkpoint::Checkpoint`].
    pub fn to_map(&self) -> FxHashMap<String, Value> {
        self.values.clone()
    }
}

/// A deep-copied, read-only view of [`State`] handed to a task at
/// dispatch time. Distinct from `State` only in intent: nodes read a
/// `StateSnapshot`, never the live run state.
pub type StateSnapshot = State;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::reducers::ReducerKind;
    use serde_json::json;

    fn counter_schema() -> StateSchema {
        StateSchema::new()
            .with_field("counter", ReducerKind::Overwrite, json!(0))
            .with_field("messages", ReducerKind::Append, json!([]))
    }

    #[test]
    fn apply_update_overwrite_is_idempotent() {
        let schema = counter_schema();
        let base = State::new().with_field("counter", json!(1));
        let update = State::new().with_field("counter", json!(5));
        let once = base.apply_update(&schema, &update);
        let twice = once.apply_update(&schema, &update);
        assert_eq!(once.get("counter"), twice.get("counter"));
        assert_eq!(once.get("counter"), Some(&json!(5)));
    }

    #[test]
    fn apply_update_append_accumulates() {
        let schema = counter_schema();
        let base = State::new().with_field("messages", json!(["start"]));
        let update = State::new().with_field("messages", json!(["next"]));
        let merged = base.apply_update(&schema, &update);
        assert_eq!(merged.get("messages"), Some(&json!(["start", "next"])));
    }

    #[test]
    fn restore_fills_missing_fields_with_defaults() {
        let schema = counter_schema();
        let mut values = FxHashMap::default();
        values.insert("counter".to_string(), json!(3));
        let restored = State::restore(&schema, values);
        assert_eq!(restored.get("counter"), Some(&json!(3)));
        assert_eq!(restored.get("messages"), Some(&json!([])));
    }

    #[test]
    fn restore_preserves_unknown_keys() {
        let schema = counter_schema();
        let mut values = FxHashMap::default();
        values.insert("extra_field".to_string(), json!("kept"));
        let restored = State::restore(&schema, values);
        assert_eq!(restored.get("extra_field"), Some(&json!("kept")));
    }

    #[test]
    fn deep_copy_does_not_alias() {
        let mut original = State::new().with_field("list", json!([1, 2, 3]));
        let copy = original.deep_copy();
        original.set("list", json!([9]));
        assert_eq!(copy.get("list"), Some(&json!([1, 2, 3])));
    }
}

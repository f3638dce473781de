//! `StateSchema`: declares, for each field a graph's state may carry, its
//! reducer and default value.

use serde_json::Value;

use crate::state::reducers::ReducerKind;
use rustc_hash::FxHashMap;

#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub reducer: ReducerKind,
    pub default: Value,
}

impl FieldSpec {
    pub fn new(reducer: ReducerKind, default: Value) -> Self {
        Self { reducer, default }
    }
}

/// Declares the set of fields a [`crate::state::State`] may carry, along
/// with the reducer and default for each. Fields absent from the schema
/// fall back to the `Overwrite` reducer and a `null` default — unknown
/// keys are never rejected, only treated conservatively (spec §4.1:
/// "unknown keys are preserved").
#[derive(Clone, Debug, Default)]
pub struct StateSchema {
    fields: FxHashMap<String, FieldSpec>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        reducer: ReducerKind,
        default: Value,
    ) -> Self {
        self.fields.insert(name.into(), FieldSpec::new(reducer, default));
        self
    }

    pub fn register_field(&mut self, name: impl Into<String>, reducer: ReducerKind, default: Value) {
        self.fields.insert(name.into(), FieldSpec::new(reducer, default));
    }

    pub fn reducer_for(&self, field: &str) -> ReducerKind {
        self.fields
            .get(field)
            .map(|spec| spec.reducer.clone())
            .unwrap_or(ReducerKind::Overwrite)
    }

    pub fn default_for(&self, field: &str) -> Value {
        self.fields
            .get(field)
            .map(|spec| spec.default.clone())
            .unwrap_or(Value::Null)
    }

    pub fn declared_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_declared(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }
}

//! Per-field reducers: the pure functions that combine an existing field
//! value with an incoming update into a merged value.
//!
//! Three reducers ship with the core (`overwrite`, `append`, `merge`);
//! callers may register a `Custom` reducer per field for anything else.
//! All reducers must be pure — no I/O, no interior mutability observable
//! from outside the call.

mod append;
mod merge;
mod overwrite;

pub use append::AppendReducer;
pub use merge::MergeReducer;
pub use overwrite::OverwriteReducer;

use std::fmt;
use std::sync::Arc;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

/// A pure function combining an existing field value with an update.
pub trait Reducer: Send + Sync {
    fn apply(&self, existing: &Value, update: &Value) -> Value;
}

/// Errors surfaced while resolving or applying a field's reducer. The core
/// reducers (`overwrite`/`append`/`merge`) are total and never produce
/// this; it exists for `Custom` reducers and schema validation call sites.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum ReducerError {
    #[error("no reducer registered for field: {field}")]
    #[diagnostic(code(latticeflow::reducer::unknown_field))]
    UnknownField { field: String },

    #[error("reducer for field {field} failed: {message}")]
    #[diagnostic(code(latticeflow::reducer::apply))]
    Apply { field: String, message: String },
}

/// The reducer chosen for one schema field.
#[derive(Clone)]
pub enum ReducerKind {
    /// `new` replaces `old` entirely. The default for undeclared fields.
    Overwrite,
    /// List concatenation; non-array operands are treated as a
    /// single-element list before concatenating.
    Append,
    /// Key-wise merge for objects; `new` wins on key collision.
    Merge,
    /// Caller-registered pure reducer.
    Custom(Arc<dyn Reducer>),
}

impl fmt::Debug for ReducerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReducerKind::Overwrite => write!(f, "Overwrite"),
            ReducerKind::Append => write!(f, "Append"),
            ReducerKind::Merge => write!(f, "Merge"),
            ReducerKind::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl ReducerKind {
    pub fn apply(&self, existing: &Value, update: &Value) -> Value {
        match self {
            ReducerKind::Overwrite => OverwriteReducer.apply(existing, update),
            ReducerKind::Append => AppendReducer.apply(existing, update),
            ReducerKind::Merge => MergeReducer.apply(existing, update),
            ReducerKind::Custom(reducer) => reducer.apply(existing, update),
        }
    }
}

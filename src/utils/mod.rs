//! Shared low-level utilities: JSON manipulation, id generation, and small
//! collection helpers used throughout the state, channel, and checkpoint
//! layers.

pub mod collections;
pub mod id_generator;
pub mod json_ext;

pub use id_generator::IdGenerator;
pub use json_ext::{deep_copy_value, deep_copy_via_json, JsonError, JsonValueExt, MergeStrategy};

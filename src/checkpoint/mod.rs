//! Checkpoint model and the pluggable [`Saver`] storage contract (spec §3, §4.6).

pub mod memory;
pub mod model;
pub mod saver;
#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sql;

pub use memory::InMemorySaver;
pub use model::{Checkpoint, CheckpointMetadata, CheckpointSource, CheckpointTuple, InterruptState, PendingWrite};
pub use saver::{CheckpointerError, ListFilter, PutFullRequest, PutRequest, PutWritesRequest, Result, Saver};

#[cfg(feature = "sqlite")]
pub use sql::SqliteSaver;
#[cfg(feature = "postgres")]
pub use sql::PostgresSaver;

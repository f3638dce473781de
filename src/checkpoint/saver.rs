//! The pluggable checkpoint saver contract (spec §4.6).

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use super::model::{Checkpoint, CheckpointMetadata, CheckpointTuple, CheckpointRef, PendingWrite};

#[derive(Debug, Error, Diagnostic, Clone)]
pub enum CheckpointerError {
    #[error("missing lineage id for saver call")]
    #[diagnostic(
        code(latticeflow::checkpointer::missing_lineage),
        help("Set `configurable.thread_id`/`lineage_id` before calling a saver method.")
    )]
    MissingLineage,

    #[error("checkpoint not found: {lineage_id}/{namespace}/{checkpoint_id}")]
    #[diagnostic(code(latticeflow::checkpointer::not_found))]
    NotFound {
        lineage_id: String,
        namespace: String,
        checkpoint_id: String,
    },

    #[error("backend error: {message}")]
    #[diagnostic(code(latticeflow::checkpointer::backend))]
    Backend { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(code(latticeflow::checkpointer::serde))]
    Serde { message: String },
}

impl From<serde_json::Error> for CheckpointerError {
    fn from(err: serde_json::Error) -> Self {
        CheckpointerError::Serde { message: err.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Filter applied by [`Saver::list`]: `before` bounds by checkpoint
/// recency (strictly older than the referenced checkpoint), `limit` caps
/// the result count, and `metadata` is matched as an exact key/value
/// subset of each candidate's `CheckpointMetadata.extra`.
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    pub before: Option<CheckpointRef>,
    pub limit: Option<usize>,
    pub metadata: FxHashMap<String, Value>,
}

pub struct PutRequest {
    pub config: CheckpointRef,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub new_versions: FxHashMap<String, u64>,
}

pub struct PutWritesRequest {
    pub config: CheckpointRef,
    pub writes: Vec<PendingWrite>,
    pub task_id: String,
    pub task_path: Option<String>,
}

pub struct PutFullRequest {
    pub config: CheckpointRef,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub new_versions: FxHashMap<String, u64>,
    pub pending_writes: Vec<PendingWrite>,
}

/// Pluggable durable storage for checkpoints. Implementations need not be
/// transactional across calls individually, but `put_full` MUST commit the
/// checkpoint and its pending writes atomically — that is the one
/// correctness-critical guarantee the scheduler relies on for resume
/// (spec §1 Non-goals, §4.6).
#[async_trait]
pub trait Saver: Send + Sync {
    async fn get(&self, config: &CheckpointRef) -> Result<Option<Checkpoint>> {
        Ok(self.get_tuple(config).await?.map(|tuple| tuple.checkpoint))
    }

    /// Returns `Ok(None)` when absent. When `config.checkpoint_id` is
    /// empty, resolves to the latest-by-timestamp checkpoint in
    /// `(lineage, namespace)`.
    async fn get_tuple(&self, config: &CheckpointRef) -> Result<Option<CheckpointTuple>>;

    /// Newest-first, filtered by `filter`.
    async fn list(&self, config: &CheckpointRef, filter: &ListFilter) -> Result<Vec<CheckpointTuple>>;

    async fn put(&self, req: PutRequest) -> Result<CheckpointRef>;

    async fn put_writes(&self, req: PutWritesRequest) -> Result<()>;

    /// Atomic "checkpoint + pending writes" commit; required for correct
    /// resume semantics (spec §4.6).
    async fn put_full(&self, req: PutFullRequest) -> Result<CheckpointRef>;

    async fn delete_lineage(&self, lineage_id: &str) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

//! Read-only history queries over a lineage's saved checkpoints, plus a
//! controlled state edit that forks a new checkpoint from a prior one
//! (spec §4.7).

use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::checkpoint::{CheckpointMetadata, CheckpointSource, CheckpointerError, ListFilter, PutFullRequest, Saver};
use crate::state::{State, StateSchema, StateSnapshot};
use crate::types::{reserved, CheckpointRef};

#[derive(Debug, Error, Diagnostic)]
pub enum TimeTravelError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpointer(#[from] CheckpointerError),

    #[error("checkpoint not found: {lineage_id}/{namespace}/{checkpoint_id}")]
    #[diagnostic(code(latticeflow::time_travel::not_found))]
    NotFound {
        lineage_id: String,
        namespace: String,
        checkpoint_id: String,
    },

    #[error("refusing to write protected key `{key}` without allow_internal_keys")]
    #[diagnostic(
        code(latticeflow::time_travel::protected_key),
        help("Pass `EditOptions { allow_internal_keys: true, .. }` to write reserved keys.")
    )]
    ProtectedKey { key: String },
}

pub type Result<T> = std::result::Result<T, TimeTravelError>;

fn not_found(config: &CheckpointRef) -> TimeTravelError {
    TimeTravelError::NotFound {
        lineage_id: config.lineage_id.clone(),
        namespace: config.namespace.clone(),
        checkpoint_id: config.checkpoint_id.clone(),
    }
}

/// A restored, point-in-time view of a run: the resolved coordinate, the
/// schema-restored state, and the plan recorded at that checkpoint (spec
/// §4.7 `GetState`).
#[derive(Debug, Clone)]
pub struct StateView {
    pub config: CheckpointRef,
    pub state: StateSnapshot,
    pub next_nodes: Vec<String>,
    pub next_channels: Vec<String>,
    pub metadata: CheckpointMetadata,
}

/// One header in a lineage's checkpoint history (spec §4.7 `History`).
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub config: CheckpointRef,
    pub metadata: CheckpointMetadata,
    pub next_nodes: Vec<String>,
}

/// Controls for [`edit_state`].
#[derive(Debug, Clone, Default)]
pub struct EditOptions {
    /// Permit writing reserved `__..__` keys directly. Off by default:
    /// those keys form the wire contract with node implementations and an
    /// edit that corrupts one can silently break resume.
    pub allow_internal_keys: bool,
}

/// Loads the checkpoint at `config` and restores its state through
/// `schema`, surfacing the `nextNodes`/`nextChannels` plan recorded at
/// that point (spec §4.7 `GetState`).
pub async fn get_state(saver: &Arc<dyn Saver>, schema: &StateSchema, config: &CheckpointRef) -> Result<StateView> {
    let tuple = saver.get_tuple(config).await?.ok_or_else(|| not_found(config))?;
    let state = State::restore(schema, tuple.checkpoint.channel_values);
    Ok(StateView {
        config: tuple.config,
        state,
        next_nodes: tuple.checkpoint.next_nodes,
        next_channels: tuple.checkpoint.next_channels,
        metadata: tuple.metadata,
    })
}

/// Lists a lineage's checkpoints, newest-first, capped at `limit` (spec
/// §4.7 `History`).
pub async fn history(saver: &Arc<dyn Saver>, config: &CheckpointRef, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
    let filter = ListFilter {
        limit,
        ..ListFilter::default()
    };
    let tuples = saver.list(config, &filter).await?;
    Ok(tuples
        .into_iter()
        .map(|tuple| HistoryEntry {
            config: tuple.config,
            metadata: tuple.metadata,
            next_nodes: tuple.checkpoint.next_nodes,
        })
        .collect())
}

/// Forks a new `source = "update"` checkpoint from `base`: deep-copies its
/// state, applies `patch` through the schema's reducers, and points the new
/// checkpoint's parent at `base`'s resolved coordinate. Rejects reserved
/// keys in `patch` unless `options.allow_internal_keys` is set (spec §4.7
/// `EditState`).
pub async fn edit_state(
    saver: &Arc<dyn Saver>,
    schema: &StateSchema,
    base: &CheckpointRef,
    patch: FxHashMap<String, Value>,
    options: EditOptions,
) -> Result<CheckpointRef> {
    if !options.allow_internal_keys {
        if let Some(key) = patch.keys().find(|key| reserved::is_protected(key.as_str())) {
            return Err(TimeTravelError::ProtectedKey { key: key.clone() });
        }
    }

    let tuple = saver.get_tuple(base).await?.ok_or_else(|| not_found(base))?;
    let base_config = tuple.config;

    let existing = State::restore(schema, tuple.checkpoint.channel_values.clone());
    let update = State::from_map(patch.clone());
    let merged = existing.apply_update(schema, &update);

    let new_id = Uuid::new_v4().to_string();
    let mut checkpoint = tuple.checkpoint;
    checkpoint.id = new_id.clone();
    checkpoint.timestamp = Utc::now();
    checkpoint.channel_values = merged.to_map();
    checkpoint.parent_checkpoint_id = Some(base_config.checkpoint_id.clone());

    let mut metadata = CheckpointMetadata::new(CheckpointSource::Update, tuple.metadata.step);
    metadata.parents.insert(base_config.namespace.clone(), base_config.checkpoint_id.clone());
    metadata.extra.insert(
        "updated_keys".to_string(),
        Value::Array(patch.keys().cloned().map(Value::String).collect()),
    );

    let new_versions = checkpoint.channel_versions.clone();
    saver
        .put_full(PutFullRequest {
            config: base_config,
            checkpoint,
            metadata,
            new_versions,
            pending_writes: tuple.pending_writes,
        })
        .await
        .map_err(TimeTravelError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemorySaver;
    use crate::state::reducers::ReducerKind;
    use serde_json::json;

    fn schema() -> StateSchema {
        StateSchema::new().with_field("count", ReducerKind::Overwrite, json!(0))
    }

    async fn seed(saver: &Arc<dyn Saver>, schema: &StateSchema, lineage: &str, count: i64) -> CheckpointRef {
        let config = CheckpointRef::new(lineage);
        let state = State::new().with_field("count", json!(count));
        let mut checkpoint = crate::checkpoint::Checkpoint::new(Uuid::new_v4().to_string());
        checkpoint.channel_values = state.to_map();
        let metadata = CheckpointMetadata::new(CheckpointSource::Loop, 1);
        let _ = schema;
        saver
            .put_full(PutFullRequest {
                config,
                checkpoint,
                metadata,
                new_versions: FxHashMap::default(),
                pending_writes: Vec::new(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn edit_state_forks_checkpoint_with_parent_link() {
        let saver: Arc<dyn Saver> = Arc::new(InMemorySaver::new());
        let schema = schema();
        let base = seed(&saver, &schema, "lineage-1", 1).await;

        let mut patch = FxHashMap::default();
        patch.insert("count".to_string(), json!(2));
        let edited = edit_state(&saver, &schema, &base, patch, EditOptions::default()).await.unwrap();

        assert_ne!(edited.checkpoint_id, base.checkpoint_id);

        let view = get_state(&saver, &schema, &edited).await.unwrap();
        assert_eq!(view.state.get("count"), Some(&json!(2)));

        let tuple = saver.get_tuple(&edited).await.unwrap().unwrap();
        assert_eq!(tuple.checkpoint.parent_checkpoint_id.as_deref(), Some(base.checkpoint_id.as_str()));
        assert_eq!(tuple.metadata.source, CheckpointSource::Update);
    }

    #[tokio::test]
    async fn edit_state_rejects_protected_keys_by_default() {
        let saver: Arc<dyn Saver> = Arc::new(InMemorySaver::new());
        let schema = schema();
        let base = seed(&saver, &schema, "lineage-2", 1).await;

        let mut patch = FxHashMap::default();
        patch.insert(reserved::RESUME.to_string(), json!("sneaky"));
        let result = edit_state(&saver, &schema, &base, patch, EditOptions::default()).await;
        assert!(matches!(result, Err(TimeTravelError::ProtectedKey { .. })));
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let saver: Arc<dyn Saver> = Arc::new(InMemorySaver::new());
        let schema = schema();
        let config = CheckpointRef::new("lineage-3");
        for i in 0..3 {
            let mut checkpoint = crate::checkpoint::Checkpoint::new(format!("chk-{i}"));
            checkpoint.channel_values = State::new().with_field("count", json!(i)).to_map();
            saver
                .put_full(PutFullRequest {
                    config: config.clone(),
                    checkpoint,
                    metadata: CheckpointMetadata::new(CheckpointSource::Loop, i as u64),
                    new_versions: FxHashMap::default(),
                    pending_writes: Vec::new(),
                })
                .await
                .unwrap();
        }
        let _ = &schema;
        let entries = history(&saver, &config, None).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].config.checkpoint_id, "chk-2");
    }
}

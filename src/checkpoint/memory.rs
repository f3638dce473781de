//! In-process [`Saver`] backed by an `FxHashMap`, the default for tests
//! and single-process runs (spec §4.6).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::model::{Checkpoint, CheckpointMetadata, CheckpointTuple, CheckpointRef, PendingWrite};
use super::saver::{CheckpointerError, ListFilter, PutFullRequest, PutRequest, PutWritesRequest, Result, Saver};

#[derive(Clone)]
struct StoredCheckpoint {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    parent_checkpoint_id: Option<String>,
    pending_writes: Vec<PendingWrite>,
}

/// Keyed `lineage_id -> namespace -> checkpoint_id -> StoredCheckpoint`,
/// with an ordered `order` vector per `(lineage, namespace)` tracking
/// insertion order for newest-first listing and for resolving an empty
/// `checkpoint_id` to "latest".
#[derive(Default)]
struct Store {
    checkpoints: FxHashMap<(String, String), FxHashMap<String, StoredCheckpoint>>,
    order: FxHashMap<(String, String), Vec<String>>,
}

/// In-memory [`Saver`]. Optionally bounded by `max_checkpoints_per_thread`,
/// pruning the oldest checkpoint in a `(lineage, namespace)` once the cap
/// is exceeded — mirrors the teacher's capped in-memory checkpointer.
pub struct InMemorySaver {
    store: Arc<RwLock<Store>>,
    max_checkpoints_per_thread: Option<usize>,
}

impl Default for InMemorySaver {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySaver {
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            max_checkpoints_per_thread: None,
        }
    }

    pub fn with_capacity(max_checkpoints_per_thread: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            max_checkpoints_per_thread: Some(max_checkpoints_per_thread),
        }
    }

    fn key(config: &CheckpointRef) -> (String, String) {
        (config.lineage_id.clone(), config.namespace.clone())
    }
}

#[async_trait]
impl Saver for InMemorySaver {
    async fn get_tuple(&self, config: &CheckpointRef) -> Result<Option<CheckpointTuple>> {
        if config.lineage_id.is_empty() {
            return Err(CheckpointerError::MissingLineage);
        }
        let store = self.store.read();
        let key = Self::key(config);
        let Some(bucket) = store.checkpoints.get(&key) else {
            return Ok(None);
        };
        let id = if config.checkpoint_id.is_empty() {
            match store.order.get(&key).and_then(|order| order.last()) {
                Some(id) => id.clone(),
                None => return Ok(None),
            }
        } else {
            config.checkpoint_id.clone()
        };
        let Some(stored) = bucket.get(&id) else {
            return Ok(None);
        };
        Ok(Some(CheckpointTuple {
            config: config.clone().with_checkpoint_id(id),
            checkpoint: stored.checkpoint.clone(),
            metadata: stored.metadata.clone(),
            parent_config: stored.parent_checkpoint_id.clone().map(|pid| config.clone().with_checkpoint_id(pid)),
            pending_writes: stored.pending_writes.clone(),
        }))
    }

    async fn list(&self, config: &CheckpointRef, filter: &ListFilter) -> Result<Vec<CheckpointTuple>> {
        let store = self.store.read();
        let key = Self::key(config);
        let Some(order) = store.order.get(&key) else {
            return Ok(Vec::new());
        };
        let bucket = &store.checkpoints[&key];

        let before_idx = match &filter.before {
            Some(cfg) => order.iter().position(|id| *id == cfg.checkpoint_id),
            None => None,
        };

        let mut out = Vec::new();
        for (idx, id) in order.iter().enumerate().rev() {
            if let Some(cut) = before_idx {
                if idx >= cut {
                    continue;
                }
            }
            let stored = &bucket[id];
            if !filter.metadata.is_empty() {
                let matches = filter
                    .metadata
                    .iter()
                    .all(|(k, v)| stored.metadata.extra.get(k) == Some(v));
                if !matches {
                    continue;
                }
            }
            out.push(CheckpointTuple {
                config: config.clone().with_checkpoint_id(id.clone()),
                checkpoint: stored.checkpoint.clone(),
                metadata: stored.metadata.clone(),
                parent_config: stored
                    .parent_checkpoint_id
                    .clone()
                    .map(|pid| config.clone().with_checkpoint_id(pid)),
                pending_writes: stored.pending_writes.clone(),
            });
            if let Some(limit) = filter.limit {
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    async fn put(&self, req: PutRequest) -> Result<CheckpointRef> {
        if req.config.lineage_id.is_empty() {
            return Err(CheckpointerError::MissingLineage);
        }
        let mut store = self.store.write();
        let key = Self::key(&req.config);
        let id = req.checkpoint.id.clone();
        let parent = req.config.checkpoint_id.clone();
        let parent = if parent.is_empty() { None } else { Some(parent) };

        let order = store.order.entry(key.clone()).or_default();
        if !order.contains(&id) {
            order.push(id.clone());
        }
        let bucket = store.checkpoints.entry(key).or_default();
        let pending_writes = bucket.get(&id).map(|s| s.pending_writes.clone()).unwrap_or_default();
        bucket.insert(
            id.clone(),
            StoredCheckpoint {
                checkpoint: req.checkpoint,
                metadata: req.metadata,
                parent_checkpoint_id: parent,
                pending_writes,
            },
        );
        let _ = req.new_versions;
        Ok(req.config.with_checkpoint_id(id))
    }

    async fn put_writes(&self, req: PutWritesRequest) -> Result<()> {
        if req.config.lineage_id.is_empty() {
            return Err(CheckpointerError::MissingLineage);
        }
        let mut store = self.store.write();
        let key = Self::key(&req.config);
        let bucket = store.checkpoints.get_mut(&key).ok_or_else(|| CheckpointerError::NotFound {
            lineage_id: req.config.lineage_id.clone(),
            namespace: req.config.namespace.clone(),
            checkpoint_id: req.config.checkpoint_id.clone(),
        })?;
        let stored = bucket.get_mut(&req.config.checkpoint_id).ok_or_else(|| CheckpointerError::NotFound {
            lineage_id: req.config.lineage_id.clone(),
            namespace: req.config.namespace.clone(),
            checkpoint_id: req.config.checkpoint_id.clone(),
        })?;
        for write in req.writes {
            if !stored
                .pending_writes
                .iter()
                .any(|existing| existing.task_id == write.task_id && existing.channel == write.channel)
            {
                stored.pending_writes.push(write);
            }
        }
        let _ = req.task_path;
        Ok(())
    }

    async fn put_full(&self, req: PutFullRequest) -> Result<CheckpointRef> {
        let saved = self
            .put(PutRequest {
                config: req.config.clone(),
                checkpoint: req.checkpoint,
                metadata: req.metadata,
                new_versions: req.new_versions,
            })
            .await?;
        if !req.pending_writes.is_empty() {
            self.put_writes(PutWritesRequest {
                config: saved.clone(),
                writes: req.pending_writes,
                task_id: Uuid::new_v4().to_string(),
                task_path: None,
            })
            .await?;
        }
        if let Some(cap) = self.max_checkpoints_per_thread {
            let mut store = self.store.write();
            let key = Self::key(&saved);
            if let Some(order) = store.order.get_mut(&key) {
                while order.len() > cap {
                    let evicted = order.remove(0);
                    if let Some(bucket) = store.checkpoints.get_mut(&key) {
                        bucket.remove(&evicted);
                    }
                }
            }
        }
        Ok(saved)
    }

    async fn delete_lineage(&self, lineage_id: &str) -> Result<()> {
        let mut store = self.store.write();
        store.checkpoints.retain(|(lid, _), _| lid != lineage_id);
        store.order.retain(|(lid, _), _| lid != lineage_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::model::CheckpointSource;

    fn ref_for(lineage: &str) -> CheckpointRef {
        CheckpointRef::new(lineage)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let saver = InMemorySaver::new();
        let config = ref_for("lineage-1");
        let checkpoint = Checkpoint::new("chk-1");
        let metadata = CheckpointMetadata::new(CheckpointSource::Loop, 1);

        let saved_ref = saver
            .put(PutRequest { config: config.clone(), checkpoint: checkpoint.clone(), metadata, new_versions: FxHashMap::default() })
            .await
            .unwrap();

        let fetched = saver.get(&saved_ref).await.unwrap().unwrap();
        assert_eq!(fetched.id, checkpoint.id);
    }

    #[tokio::test]
    async fn missing_lineage_rejected() {
        let saver = InMemorySaver::new();
        let result = saver.get_tuple(&CheckpointRef::new("")).await;
        assert!(matches!(result, Err(CheckpointerError::MissingLineage)));
    }

    #[tokio::test]
    async fn list_returns_newest_first() {
        let saver = InMemorySaver::new();
        let config = ref_for("lineage-2");
        for i in 0..3 {
            saver
                .put(PutRequest {
                    config: config.clone(),
                    checkpoint: Checkpoint::new(format!("chk-{i}")),
                    metadata: CheckpointMetadata::new(CheckpointSource::Loop, i),
                    new_versions: FxHashMap::default(),
                })
                .await
                .unwrap();
        }
        let listed = saver.list(&config, &ListFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].checkpoint.id, "chk-2");
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let saver = InMemorySaver::with_capacity(2);
        let config = ref_for("lineage-3");
        for i in 0..4 {
            saver
                .put(PutRequest {
                    config: config.clone(),
                    checkpoint: Checkpoint::new(format!("chk-{i}")),
                    metadata: CheckpointMetadata::new(CheckpointSource::Loop, i),
                    new_versions: FxHashMap::default(),
                })
                .await
                .unwrap();
        }
        let listed = saver.list(&config, &ListFilter::default()).await.unwrap();
        assert_eq!(listed.len(), 2);
    }
}

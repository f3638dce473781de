//! Checkpoint, metadata, pending-write, and addressing types (spec §3).

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::types::CheckpointRef;

/// An immutable, point-in-time snapshot of a run: every channel's current
/// value and version, per-node `versionsSeen`, the plan for the next
/// step, and (if paused) the interrupt that caused the pause.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "v")]
    pub version: i32,
    pub id: String,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub channel_values: FxHashMap<String, Value>,
    pub channel_versions: FxHashMap<String, u64>,
    pub versions_seen: FxHashMap<String, FxHashMap<String, u64>>,
    pub updated_channels: Vec<String>,
    #[serde(default)]
    pub pending_sends: Vec<Value>,
    #[serde(default)]
    pub barrier_sets: FxHashMap<String, Vec<String>>,
    #[serde(default)]
    pub next_nodes: Vec<String>,
    #[serde(default)]
    pub next_channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub interrupt_state: Option<InterruptState>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parent_checkpoint_id: Option<String>,
    /// Fan-out inputs preserved across an external/dynamic interrupt,
    /// keyed by target node id, each a strict FIFO queue of distinct
    /// per-target `Update` payloads awaiting one replay each (spec §4.4
    /// "Fan-out / replay semantics", metadata key `graph-interrupt-inputs`).
    #[serde(default)]
    pub graph_interrupt_inputs: FxHashMap<String, Vec<Value>>,
    /// Node ids whose static "interrupt-before" mark has already been
    /// honored for this checkpoint's lineage, so resume never re-triggers
    /// the same static interrupt (spec §4.4.b).
    #[serde(default)]
    pub static_interrupt_skips: Vec<String>,
    /// Dynamic-interrupt markers already consumed, keyed by `(node_id,
    /// task_id)` joined with `::`, preventing a resumed run from raising
    /// the same dynamic interrupt twice (spec §4.5 invariants).
    #[serde(default)]
    pub used_interrupts: Vec<String>,
}

impl Checkpoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            version: 1,
            id: id.into(),
            timestamp: Utc::now(),
            channel_values: FxHashMap::default(),
            channel_versions: FxHashMap::default(),
            versions_seen: FxHashMap::default(),
            updated_channels: Vec::new(),
            pending_sends: Vec::new(),
            barrier_sets: FxHashMap::default(),
            next_nodes: Vec::new(),
            next_channels: Vec::new(),
            interrupt_state: None,
            parent_checkpoint_id: None,
            graph_interrupt_inputs: FxHashMap::default(),
            static_interrupt_skips: Vec::new(),
            used_interrupts: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InterruptState {
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<Value>,
    pub step: u64,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resume_values: Option<FxHashMap<String, Value>>,
}

/// One task's uncommitted effect, buffered for the current step and
/// persisted atomically alongside its checkpoint. Replayed in strict
/// `sequence` order on resume (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PendingWrite {
    pub task_id: String,
    pub channel: String,
    pub value: Value,
    pub sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub task_path: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    Input,
    Loop,
    Update,
    Fork,
    Interrupt,
}

impl CheckpointSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointSource::Input => "input",
            CheckpointSource::Loop => "loop",
            CheckpointSource::Update => "update",
            CheckpointSource::Fork => "fork",
            CheckpointSource::Interrupt => "interrupt",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub source: CheckpointSource,
    pub step: u64,
    #[serde(default)]
    pub parents: FxHashMap<String, String>,
    #[serde(default)]
    pub extra: FxHashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_resuming: Option<bool>,
}

impl CheckpointMetadata {
    pub fn new(source: CheckpointSource, step: u64) -> Self {
        Self {
            source,
            step,
            parents: FxHashMap::default(),
            extra: FxHashMap::default(),
            is_resuming: None,
        }
    }
}

/// The unit returned by `GetTuple`/`List`: a checkpoint plus its
/// addressing, metadata, parent coordinate, and any pending writes not
/// yet folded into `channel_values` (spec §3).
#[derive(Clone, Debug)]
pub struct CheckpointTuple {
    pub config: CheckpointRef,
    pub checkpoint: Checkpoint,
    pub metadata: CheckpointMetadata,
    pub parent_config: Option<CheckpointRef>,
    pub pending_writes: Vec<PendingWrite>,
}

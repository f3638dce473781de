//! Per-run mutable state the scheduler advances one superstep at a time:
//! channels, merged state, `versionsSeen`, and interrupt bookkeeping
//! (spec §4.4, §4.5).

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::channels::ChannelManager;
use crate::checkpoint::{Checkpoint, CheckpointTuple};
use crate::event_bus::EventEmitter;
use crate::graph::Graph;
use crate::state::State;
use crate::types::{reserved, CheckpointRef, NodeId};

/// Everything the scheduler threads through a run: the live channel set,
/// the merged data state, per-node `versionsSeen`, dynamically-registered
/// routing channels (for `Command::GoTo` targets with no declared static
/// edge), and interrupt/fan-out bookkeeping restored from or destined for
/// a [`Checkpoint`].
pub struct ExecutionContext {
    pub(crate) channels: ChannelManager,
    pub(crate) state: State,
    pub(crate) step: u64,
    pub(crate) versions_seen: FxHashMap<NodeId, FxHashMap<String, u64>>,
    /// Routing channels registered at runtime for `Command::GoTo` targets
    /// the graph compiler did not pre-register as a static edge (spec
    /// §4.4.d: symbolic routing may address any node, not only statically
    /// wired destinations).
    pub(crate) dynamic_triggers: FxHashMap<crate::types::ChannelName, Vec<NodeId>>,
    pub(crate) config: CheckpointRef,
    pub(crate) parent_checkpoint_id: Option<String>,
    pub(crate) event_emitter: Arc<dyn EventEmitter>,
    pub(crate) max_steps: u64,

    /// Node ids (qualified `"before:<id>"` / `"after:<id>"`) whose static
    /// interrupt has already been honored once for this lineage (spec
    /// §4.4.b: fires exactly once per reached checkpoint).
    pub(crate) static_interrupt_skips: BTreeSet<String>,
    /// `"<node_id>::<task_id>"` keys for dynamic interrupts already
    /// resumed past, so a resumed run never re-raises the same one.
    pub(crate) used_interrupts: BTreeSet<String>,
    /// Per-node FIFO queues of fan-out inputs awaiting one replay each
    /// (spec §4.4 "Fan-out / replay semantics").
    pub(crate) graph_interrupt_inputs: FxHashMap<String, VecDeque<Value>>,
    /// Single caller-supplied resume value for the node that raised the
    /// last dynamic interrupt.
    pub(crate) resume_value: Option<Value>,
    pub(crate) resume_map: FxHashMap<String, Value>,
    pub(crate) pending_interrupt_node: Option<NodeId>,
    /// `nextNodes` restored from a checkpoint: the planner reuses this set
    /// directly for exactly one step instead of recomputing eligibility
    /// from channel versions (spec §4.4.a resume clause).
    pub(crate) pending_next_nodes: Option<Vec<NodeId>>,
    /// Whether this context was rebuilt from a persisted checkpoint rather
    /// than started fresh; distinguishes the bootstrap "input" checkpoint
    /// from a resumed "loop" checkpoint with `isResuming = true`.
    pub(crate) resumed: bool,
    /// Set once the opening checkpoint has been persisted, so calling
    /// `Scheduler::run` again on the same context (e.g. after an external
    /// pause) never re-emits it.
    pub(crate) bootstrapped: bool,

    write_sequence: u64,
}

impl ExecutionContext {
    /// Starts a fresh run: channels initialized from the graph's
    /// declared defs, state filled with schema defaults, entry channel
    /// primed so the entry node is eligible at step 1.
    pub fn fresh(graph: &Graph, config: CheckpointRef, event_emitter: Arc<dyn EventEmitter>, max_steps: u64) -> Self {
        let channels = ChannelManager::from_defs(graph.channel_defs());
        let state = State::restore(graph.schema(), FxHashMap::default());
        channels.update(
            &Graph::entry_channel(),
            crate::channels::ChannelWrite::Value(Value::Bool(true)),
            0,
        );

        Self {
            channels,
            state,
            step: 0,
            versions_seen: FxHashMap::default(),
            dynamic_triggers: FxHashMap::default(),
            config,
            parent_checkpoint_id: None,
            event_emitter,
            max_steps,
            static_interrupt_skips: BTreeSet::new(),
            used_interrupts: BTreeSet::new(),
            graph_interrupt_inputs: FxHashMap::default(),
            resume_value: None,
            resume_map: FxHashMap::default(),
            pending_interrupt_node: None,
            pending_next_nodes: None,
            resumed: false,
            bootstrapped: false,
            write_sequence: 0,
        }
    }

    /// Rebuilds a run in progress from a persisted [`CheckpointTuple`]
    /// (spec §4.6 resume path).
    pub fn from_tuple(graph: &Graph, tuple: CheckpointTuple, event_emitter: Arc<dyn EventEmitter>, max_steps: u64) -> Self {
        let CheckpointTuple {
            config,
            checkpoint,
            metadata,
            parent_config,
            ..
        } = tuple;

        let channels = ChannelManager::from_defs(graph.channel_defs());
        channels.restore_from(&checkpoint.channel_versions, &checkpoint.barrier_sets);
        let state = State::restore(graph.schema(), checkpoint.channel_values.clone());

        let versions_seen = checkpoint
            .versions_seen
            .iter()
            .map(|(node, channels)| (NodeId::from(node.as_str()), channels.clone()))
            .collect();

        let graph_interrupt_inputs = checkpoint
            .graph_interrupt_inputs
            .iter()
            .map(|(node, values)| (node.clone(), VecDeque::from(values.clone())))
            .collect();

        Self {
            channels,
            state,
            step: metadata.step,
            versions_seen,
            dynamic_triggers: FxHashMap::default(),
            config,
            parent_checkpoint_id: parent_config.map(|c| c.checkpoint_id),
            event_emitter,
            max_steps,
            static_interrupt_skips: checkpoint.static_interrupt_skips.iter().cloned().collect(),
            used_interrupts: checkpoint.used_interrupts.iter().cloned().collect(),
            graph_interrupt_inputs,
            resume_value: checkpoint
                .interrupt_state
                .as_ref()
                .and_then(|i| i.resume_values.as_ref())
                .and_then(|m| m.get(reserved::RESUME).cloned()),
            resume_map: checkpoint
                .interrupt_state
                .as_ref()
                .and_then(|i| i.resume_values.clone())
                .unwrap_or_default(),
            pending_interrupt_node: checkpoint
                .interrupt_state
                .as_ref()
                .filter(|i| !i.node_id.is_empty())
                .map(|i| NodeId::from(i.node_id.as_str())),
            pending_next_nodes: if checkpoint.next_nodes.is_empty() {
                None
            } else {
                Some(checkpoint.next_nodes.iter().map(|n| NodeId::from(n.as_str())).collect())
            },
            resumed: true,
            bootstrapped: false,
            write_sequence: 0,
        }
    }

    pub fn config(&self) -> &CheckpointRef {
        &self.config
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    pub fn next_task_id(&mut self) -> String {
        self.write_sequence += 1;
        Uuid::new_v4().to_string()
    }

    pub fn next_write_sequence(&mut self) -> u64 {
        self.write_sequence += 1;
        self.write_sequence
    }

    /// Supplies the value a caller wants delivered to `ctx.resume` the
    /// next time the interrupted node is re-invoked.
    pub fn set_resume_value(&mut self, value: Value) {
        self.resume_value = Some(value);
    }

    pub fn set_resume_map(&mut self, values: FxHashMap<String, Value>) {
        self.resume_map = values;
    }

    /// Queues a fan-out input for `node`, consumed one at a time across
    /// successive resumes (spec §4.4 "Fan-out / replay semantics").
    pub fn push_interrupt_input(&mut self, node: &NodeId, value: Value) {
        self.graph_interrupt_inputs.entry(node.as_str().to_string()).or_default().push_back(value);
    }

    pub(crate) fn take_interrupt_input(&mut self, node: &NodeId) -> Option<Value> {
        self.graph_interrupt_inputs.get_mut(node.as_str()).and_then(VecDeque::pop_front)
    }

    pub(crate) fn build_checkpoint(
        &self,
        id: impl Into<String>,
        next_nodes: Vec<String>,
        next_channels: Vec<String>,
    ) -> Checkpoint {
        let mut checkpoint = Checkpoint::new(id);
        checkpoint.channel_values = self.state.to_map();
        checkpoint.channel_versions = self.channels.all_versions();
        checkpoint.versions_seen = self
            .versions_seen
            .iter()
            .map(|(node, channels)| (node.as_str().to_string(), channels.clone()))
            .collect();
        checkpoint.updated_channels = self.channels.updated_in_step(self.step);
        checkpoint.barrier_sets = self.channels.all_barrier_sets();
        checkpoint.next_nodes = next_nodes;
        checkpoint.next_channels = next_channels;
        checkpoint.parent_checkpoint_id = self.parent_checkpoint_id.clone();
        checkpoint.static_interrupt_skips = self.static_interrupt_skips.iter().cloned().collect();
        checkpoint.used_interrupts = self.used_interrupts.iter().cloned().collect();
        checkpoint.graph_interrupt_inputs = self
            .graph_interrupt_inputs
            .iter()
            .map(|(node, queue)| (node.clone(), queue.iter().cloned().collect()))
            .collect();
        checkpoint
    }
}

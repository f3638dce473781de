//! The uniform function contract the scheduler calls through. Node bodies
//! are opaque to the core: they receive a deep-copied state snapshot and a
//! context, and return zero or more state updates, routing commands, a
//! dynamic interrupt, or a terminal error (spec §1, §4.4.d).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::channels::errors::ErrorEvent;
use crate::event_bus::{Event, EventEmitter};
use crate::scheduler::interrupt::RunCancellation;
use crate::state::StateSnapshot;
use crate::types::NodeId;

/// A single unit of computation within a compiled [`crate::graph::Graph`].
///
/// Implementations should be deterministic given their snapshot and any
/// resume payload in `ctx`; the scheduler deep-copies the snapshot handed
/// to each task so concurrently-dispatched nodes never observe each
/// other's mutations (spec §5).
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, snapshot: StateSnapshot, ctx: NodeContext) -> Result<NodePartial, NodeError>;
}

/// Everything a node body needs besides its input snapshot: its own
/// identity, the step it is running in, the task that invoked it, any
/// resume payload carried over from a prior dynamic interrupt, and an
/// emitter for observability events.
#[derive(Clone)]
pub struct NodeContext {
    pub node_id: NodeId,
    pub step: u64,
    pub task_id: String,
    /// Present when this invocation is replaying after a dynamic
    /// interrupt: the single resume value (`__resume__`), if any.
    pub resume: Option<Value>,
    /// Present when resuming with a per-task resume map (`__resume_map__`)
    /// and this task's id has an entry.
    pub resume_map_value: Option<Value>,
    /// One queued fan-out input for this invocation, taken from the target
    /// node's FIFO queue (spec §4.4 "Fan-out / replay semantics"). `None`
    /// outside a fan-out delivery.
    pub fan_in: Option<Value>,
    /// The `nodeTimeout` the scheduler enforces around this invocation, if
    /// any (spec §4.4.c). Informational for the node body; the scheduler
    /// enforces it regardless of whether the node itself checks it.
    pub deadline: Option<Duration>,
    /// The run's cancellation handle, so a long-running node body can poll
    /// or await it and exit early instead of waiting to be aborted (spec
    /// §4.4.c "a cancellable context that also reacts to ... the external
    /// interrupt watcher").
    pub cancellation: Option<RunCancellation>,
    pub event_emitter: Arc<dyn EventEmitter>,
}

impl NodeContext {
    pub fn emit(&self, scope: impl Into<String>, message: impl Into<String>) -> Result<(), NodeContextError> {
        self.event_emitter
            .emit(Event::node_message_with_meta(
                self.node_id.as_str(),
                self.step,
                scope,
                message,
            ))
            .map_err(|_| NodeContextError::EventBusUnavailable)
    }

    pub fn emit_diagnostic(&self, scope: impl Into<String>, message: impl Into<String>) -> Result<(), NodeContextError> {
        self.event_emitter
            .emit(Event::diagnostic(scope, message))
            .map_err(|_| NodeContextError::EventBusUnavailable)
    }

    /// Raise a dynamic interrupt: pauses the run at this node, carrying
    /// `value` out to the caller. On resume the node is re-invoked with
    /// `ctx.resume` populated, unless `skip_rerun` is set.
    pub fn interrupt(&self, value: Value) -> NodeError {
        NodeError::Interrupt(InterruptError {
            value,
            node_id: self.node_id.clone(),
            task_id: self.task_id.clone(),
            path: vec![self.node_id.as_str().to_string()],
            skip_rerun: false,
        })
    }
}

/// Routing/update instructions a node may emit alongside (or instead of)
/// its default static-edge routing (spec §3 Checkpoint / §4.4.d–e).
#[derive(Clone, Debug)]
pub enum Command {
    /// Route to a node, resolved via the source node's `ends` map first,
    /// falling back to treating the symbol as a literal node id.
    GoTo(String),
    /// A state update, merged via the schema's reducers alongside the
    /// node's `NodePartial::update`.
    Update(FxHashMap<String, Value>),
    /// Carries a single resume value forward for the next dynamic
    /// interrupt resume cycle (rarely used directly by node authors;
    /// chiefly a caller-supplied resume payload).
    Resume(Value),
    /// Per-task resume values keyed by task id, for fan-out resume.
    ResumeMap(FxHashMap<String, Value>),
    /// Routes to `target` (resolved like `GoTo`) while queuing `value` as
    /// one fan-out input for that target, delivered to exactly one future
    /// invocation of it via [`NodeContext::fan_in`] (spec §4.4 "Fan-out /
    /// replay semantics"). Emitting this twice for the same target queues
    /// two independent deliveries, each consumed by a separate superstep.
    RouteWithValue(String, Value),
}

/// Partial state updates and routing instructions returned by a node
/// invocation. All fields are optional: a node may update state without
/// routing explicitly (falling back to the graph's static edges), route
/// without updating state, or both.
#[derive(Clone, Debug, Default)]
pub struct NodePartial {
    pub update: Option<FxHashMap<String, Value>>,
    pub commands: Option<Vec<Command>>,
    pub errors: Option<Vec<ErrorEvent>>,
}

impl NodePartial {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_update(mut self, update: FxHashMap<String, Value>) -> Self {
        self.update = Some(update);
        self
    }

    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: Value) -> Self {
        self.update.get_or_insert_with(FxHashMap::default).insert(field.into(), value);
        self
    }

    #[must_use]
    pub fn with_commands(mut self, commands: Vec<Command>) -> Self {
        self.commands = Some(commands);
        self
    }

    #[must_use]
    pub fn with_goto(mut self, target: impl Into<String>) -> Self {
        self.commands.get_or_insert_with(Vec::new).push(Command::GoTo(target.into()));
        self
    }

    #[must_use]
    pub fn with_route_value(mut self, target: impl Into<String>, value: Value) -> Self {
        self.commands.get_or_insert_with(Vec::new).push(Command::RouteWithValue(target.into(), value));
        self
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Vec<ErrorEvent>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Every `Command::GoTo` target in emission order.
    pub fn goto_targets(&self) -> Vec<&str> {
        self.commands
            .iter()
            .flatten()
            .filter_map(|c| match c {
                Command::GoTo(target) => Some(target.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Every `Command::RouteWithValue` (target, value) pair in emission order.
    pub fn fan_out_targets(&self) -> Vec<(&str, &Value)> {
        self.commands
            .iter()
            .flatten()
            .filter_map(|c| match c {
                Command::RouteWithValue(target, value) => Some((target.as_str(), value)),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum NodeContextError {
    #[error("failed to emit event: event bus unavailable")]
    #[diagnostic(code(latticeflow::node::event_bus_unavailable))]
    EventBusUnavailable,
}

/// A node-raised dynamic interrupt (spec §4.5). Distinct from a terminal
/// `NodeError` — the scheduler converts this into an "interrupt"
/// checkpoint and ends the run cleanly rather than surfacing a failure.
#[derive(Debug, Clone, Error)]
#[error("interrupt raised at node {node_id} (task {task_id})")]
pub struct InterruptError {
    pub value: Value,
    pub node_id: NodeId,
    pub task_id: String,
    pub path: Vec<String>,
    /// If set, the run advances past this node on resume instead of
    /// re-invoking it with the resume payload.
    pub skip_rerun: bool,
}

/// Fatal errors that halt the run, surfaced on the output stream as a
/// terminal error event (spec §7), except [`NodeError::Interrupt`] which
/// the scheduler handles as a clean pause rather than a failure.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(latticeflow::node::missing_input),
        help("Check that an upstream node produced the required field: {what}.")
    )]
    MissingInput { what: String },

    #[error("node {node_id} exceeded its {after:?} timeout")]
    #[diagnostic(
        code(latticeflow::node::context_cancelled),
        help("Raise the node's configured timeout, or make the node body finish faster.")
    )]
    ContextCancelled { node_id: NodeId, after: Duration },

    #[error("provider error ({provider}): {message}")]
    #[diagnostic(code(latticeflow::node::provider))]
    Provider { provider: &'static str, message: String },

    #[error(transparent)]
    #[diagnostic(code(latticeflow::node::serde_json))]
    Serde(#[from] serde_json::Error),

    #[error("validation failed: {0}")]
    #[diagnostic(code(latticeflow::node::validation))]
    ValidationFailed(String),

    #[error(transparent)]
    #[diagnostic(code(latticeflow::node::event_bus))]
    EventBus(#[from] NodeContextError),

    #[error(transparent)]
    #[diagnostic(code(latticeflow::node::interrupt))]
    Interrupt(#[from] InterruptError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_partial_collects_goto_targets_in_order() {
        let partial = NodePartial::new().with_commands(vec![
            Command::GoTo("a".into()),
            Command::Update(FxHashMap::default()),
            Command::GoTo("b".into()),
        ]);
        assert_eq!(partial.goto_targets(), vec!["a", "b"]);
    }

    #[test]
    fn node_partial_collects_fan_out_targets_in_order() {
        let partial = NodePartial::new().with_route_value("collect", json!(1)).with_route_value("collect", json!(2));
        assert_eq!(partial.fan_out_targets(), vec![("collect", &json!(1)), ("collect", &json!(2))]);
    }

    #[test]
    fn with_field_accumulates_into_update_map() {
        let partial = NodePartial::new()
            .with_field("counter", json!(1))
            .with_field("label", json!("x"));
        let update = partial.update.unwrap();
        assert_eq!(update.get("counter"), Some(&json!(1)));
        assert_eq!(update.get("label"), Some(&json!("x")));
    }
}

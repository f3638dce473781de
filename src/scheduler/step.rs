//! One BSP superstep: plan, dispatch, collect, apply, persist (spec §4.4).
//!
//! This is the dominant subsystem of the core: everything else in the
//! crate exists to be coordinated from here.

use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{instrument, warn};
use uuid::Uuid;

use super::context::ExecutionContext;
use super::interrupt::{PauseReason, RunCancellation};
use super::SchedulerError;
use crate::channels::{ChannelBehaviorKind, ChannelWrite};
use crate::checkpoint::{CheckpointMetadata, CheckpointSource, InterruptState, PendingWrite, PutFullRequest, Saver};
use crate::event_bus::{Event, LifecycleEvent, LifecycleKind};
use crate::graph::Graph;
use crate::node::{Command, NodeContext, NodeError, NodePartial};
use crate::state::State;
use crate::types::{CheckpointRef, NodeId};

/// What a completed superstep produced, independent of whether the run
/// paused immediately after.
#[derive(Clone, Debug, Default)]
pub struct StepReport {
    pub step: u64,
    pub ran_nodes: Vec<NodeId>,
    pub updated_channels: Vec<String>,
    /// True when no node is eligible for a next step — the run has
    /// reached quiescence (spec §4.4.h clause i).
    pub quiescent: bool,
}

/// The result of driving one superstep (or attempting to): either it ran
/// to completion (possibly quiescent) or the run paused for one of the
/// three interrupt mechanisms / an external request.
#[derive(Debug)]
pub enum StepOutcome {
    Completed(StepReport),
    Paused { config: CheckpointRef, reason: PauseReason },
}

/// Best-effort lifecycle event emission: dropped telemetry never blocks
/// progress (spec §5 "Deadlock/backpressure").
pub(crate) fn emit_lifecycle(ctx: &ExecutionContext, event: LifecycleEvent) {
    let _ = ctx.event_emitter.emit(Event::Lifecycle(event));
}

/// One planned invocation: the node, a fresh task id, and the fan-out
/// input (if any) it should be delivered this round.
struct PlannedTask {
    node: NodeId,
    task_id: String,
    fan_in: Option<Value>,
}

/// Computes the set of nodes eligible to run this step: reuses a
/// checkpoint-restored `nextNodes` set exactly once if present, otherwise
/// compares each node's trigger channel versions against `versionsSeen`
/// (spec §4.4.a). A Barrier trigger additionally requires every expected
/// sender to have written — a bare version bump from one sender is not
/// enough to make the join eligible. A node with a queued fan-out input
/// still awaiting delivery is always eligible, independent of channel
/// versions, so each queued input gets its own invocation (spec §4.4
/// "Fan-out / replay semantics").
fn plan(graph: &Graph, ctx: &ExecutionContext) -> Vec<NodeId> {
    if let Some(nodes) = &ctx.pending_next_nodes {
        return nodes.clone();
    }

    let mut planned: Vec<NodeId> = graph
        .node_ids()
        .filter(|node| {
            if ctx.graph_interrupt_inputs.get(node.as_str()).is_some_and(|queue| !queue.is_empty()) {
                return true;
            }
            let triggers = graph.node_triggers(node);
            if triggers.is_empty() {
                return false;
            }
            let seen = ctx.versions_seen.get(*node);
            triggers.iter().any(|channel| {
                let version = ctx.channels.version_of(channel);
                let seen_version = seen.and_then(|s| s.get(channel.as_str())).copied().unwrap_or(0);
                if version == 0 || version <= seen_version {
                    return false;
                }
                match ctx.channels.behavior_of(channel) {
                    Some(ChannelBehaviorKind::Barrier) => ctx.channels.barrier_satisfied(channel),
                    _ => true,
                }
            })
        })
        .cloned()
        .collect();
    planned.sort();
    planned
}

/// Drives one superstep of `ctx` against `graph`, persisting via `saver`.
/// Returns `Completed` (possibly quiescent) or `Paused` if a static,
/// dynamic, or external interrupt fired.
#[instrument(skip(graph, saver, ctx, cancellation), fields(step = ctx.step + 1))]
pub(crate) async fn run_superstep(
    graph: &Arc<Graph>,
    saver: &Arc<dyn Saver>,
    ctx: &mut ExecutionContext,
    cancellation: Option<&RunCancellation>,
) -> Result<StepOutcome, SchedulerError> {
    let step = ctx.step + 1;
    if step > ctx.max_steps {
        return Err(SchedulerError::MaxStepsExceeded { step, max_steps: ctx.max_steps });
    }

    let used_pending_next_nodes = ctx.pending_next_nodes.is_some();
    let planned = plan(graph, ctx);
    ctx.pending_next_nodes = None;

    if planned.is_empty() {
        return Ok(StepOutcome::Completed(StepReport {
            step: ctx.step,
            ran_nodes: Vec::new(),
            updated_channels: Vec::new(),
            quiescent: true,
        }));
    }

    // Static "before" interrupt: a single planned node that has not yet
    // been honored pauses the whole step before anything runs.
    if !used_pending_next_nodes {
        for node in &planned {
            let marker = format!("before:{node}");
            if graph.interrupt_before(node) && !ctx.static_interrupt_skips.contains(&marker) {
                ctx.static_interrupt_skips.insert(marker);
                let config = persist_interrupt(
                    saver,
                    ctx,
                    vec![node.clone()],
                    InterruptState {
                        node_id: node.as_str().to_string(),
                        task_id: None,
                        value: None,
                        step,
                        path: vec![node.as_str().to_string()],
                        resume_values: None,
                    },
                )
                .await?;
                return Ok(StepOutcome::Paused { config, reason: PauseReason::StaticBefore });
            }
        }
    }

    ctx.step = step;
    emit_lifecycle(ctx, LifecycleEvent::new(LifecycleKind::StepStart, format!("step {step} planned {} node(s)", planned.len())).with_step(step));

    let tasks: Vec<PlannedTask> = planned
        .iter()
        .map(|node| PlannedTask {
            node: node.clone(),
            task_id: ctx.next_task_id(),
            fan_in: ctx.take_interrupt_input(node),
        })
        .collect();

    // Captured before `tasks` is consumed by dispatch, so a forced
    // cancellation can tell which planned nodes never finished.
    let dispatched: Vec<(NodeId, Option<Value>)> = tasks.iter().map(|t| (t.node.clone(), t.fan_in.clone())).collect();

    let snapshot = ctx.state.deep_copy();
    let mut join_set: JoinSet<(NodeId, String, Result<NodePartial, NodeError>)> = JoinSet::new();
    for task in tasks {
        let node_impl = graph
            .node(&task.node)
            .cloned()
            .expect("planned node must be registered in the compiled graph");
        let node_snapshot = snapshot.deep_copy();
        let resume = ctx.pending_interrupt_node.as_ref().filter(|n| **n == task.node).and_then(|_| ctx.resume_value.clone());
        // Keyed by node id rather than task id: task ids are minted fresh
        // every run, so a resume map surviving a restart can only address
        // a stable node identity (documented scope decision, DESIGN.md).
        let resume_map_value = ctx.resume_map.get(task.node.as_str()).cloned();
        let deadline = graph.node_timeout(&task.node);
        let node_context = NodeContext {
            node_id: task.node.clone(),
            step,
            task_id: task.task_id.clone(),
            resume,
            resume_map_value,
            fan_in: task.fan_in,
            deadline,
            cancellation: cancellation.cloned(),
            event_emitter: ctx.event_emitter.clone(),
        };
        emit_lifecycle(
            ctx,
            LifecycleEvent::new(LifecycleKind::NodeStart, format!("dispatching {}", task.node))
                .with_node(task.node.as_str())
                .with_step(step),
        );
        let node = task.node.clone();
        let task_id = task.task_id.clone();
        join_set.spawn(async move {
            let outcome = match deadline {
                Some(bound) => match tokio::time::timeout(bound, node_impl.run(node_snapshot, node_context)).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::ContextCancelled { node_id: node.clone(), after: bound }),
                },
                None => node_impl.run(node_snapshot, node_context).await,
            };
            (node, task_id, outcome)
        });
    }

    // A configured hard timeout (`RunCancellation::with_timeout`) bounds
    // how long the collect loop waits once a pause has been requested: if
    // the grace period elapses before every task reports in, the scheduler
    // force-cancels whatever is left running rather than waiting forever
    // (spec §4.8).
    let mut results: Vec<(NodeId, String, Result<NodePartial, NodeError>)> = Vec::new();
    let mut forced_pause = false;
    'collect: loop {
        tokio::select! {
            joined = join_set.join_next() => {
                match joined {
                    Some(joined) => results.push(joined.map_err(|e| SchedulerError::Join(e.to_string()))?),
                    None => break 'collect,
                }
            }
            _ = async {
                match cancellation {
                    Some(c) => c.wait_forced().await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                forced_pause = true;
                break 'collect;
            }
        }
    }
    if forced_pause {
        join_set.abort_all();
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));

    ctx.pending_interrupt_node = None;
    ctx.resume_value = None;

    // A dynamic interrupt pauses the run cleanly rather than surfacing a
    // node error (spec §4.5 "Dynamic"); any other error is terminal.
    let mut ran: Vec<(NodeId, String, NodePartial)> = Vec::new();
    for (node, task_id, result) in results {
        match result {
            Ok(partial) => {
                emit_lifecycle(
                    ctx,
                    LifecycleEvent::new(LifecycleKind::NodeComplete, format!("{node} completed")).with_node(node.as_str()).with_step(step),
                );
                ran.push((node, task_id, partial));
            }
            Err(NodeError::Interrupt(interrupt)) => {
                let marker = format!("{}::{}", node.as_str(), task_id);
                if ctx.used_interrupts.contains(&marker) {
                    continue;
                }
                ctx.used_interrupts.insert(marker);
                let config = persist_interrupt(
                    saver,
                    ctx,
                    vec![node.clone()],
                    InterruptState {
                        node_id: node.as_str().to_string(),
                        task_id: Some(task_id.clone()),
                        value: Some(interrupt.value.clone()),
                        step,
                        path: interrupt.path.clone(),
                        resume_values: None,
                    },
                )
                .await?;
                return Ok(StepOutcome::Paused { config, reason: PauseReason::Dynamic });
            }
            Err(source) => {
                emit_lifecycle(
                    ctx,
                    LifecycleEvent::new(LifecycleKind::NodeError, format!("{node} failed: {source}")).with_node(node.as_str()).with_step(step),
                );
                return Err(SchedulerError::NodeRun { node_id: node, step, source });
            }
        }
    }

    let mut pending_writes = Vec::new();
    let mut ran_nodes = Vec::new();
    for (node, task_id, partial) in ran {
        ran_nodes.push(node.clone());
        apply_partial(graph, ctx, &node, &task_id, partial, &mut pending_writes);
    }

    // `versionsSeen` is only advanced once the step's writes are folded
    // in, so a crash before persistence re-plans identically on resume.
    for node in &ran_nodes {
        let triggers: Vec<_> = graph.node_triggers(node).to_vec();
        let entry = ctx.versions_seen.entry(node.clone()).or_default();
        for channel in &triggers {
            entry.insert(channel.as_str().to_string(), ctx.channels.version_of(channel));
            ctx.channels.acknowledge(channel);
        }
    }
    ctx.channels.consume_ephemeral_after_step(step);

    if forced_pause {
        // Nodes that finished before the grace period elapsed already had
        // their writes folded in above; whatever is left never completed,
        // so its fan-out input (if any) goes back on the queue for replay
        // and its trigger channel's `versionsSeen` was left untouched.
        let incomplete: Vec<NodeId> = dispatched
            .iter()
            .filter(|(node, _)| !ran_nodes.contains(node))
            .map(|(node, fan_in)| {
                if let Some(value) = fan_in {
                    ctx.push_interrupt_input(node, value.clone());
                }
                node.clone()
            })
            .collect();
        let interrupt_state = InterruptState {
            node_id: incomplete.first().map(|n| n.as_str().to_string()).unwrap_or_default(),
            task_id: None,
            value: None,
            step,
            path: incomplete.iter().map(|n| n.as_str().to_string()).collect(),
            resume_values: None,
        };
        let config = persist_interrupt(saver, ctx, incomplete, interrupt_state).await?;
        return Ok(StepOutcome::Paused { config, reason: PauseReason::External });
    }

    for node in &ran_nodes {
        let marker = format!("after:{node}");
        if graph.interrupt_after(node) && !ctx.static_interrupt_skips.contains(&marker) {
            ctx.static_interrupt_skips.insert(marker);
            let next_planned = plan(graph, ctx);
            let config = persist_interrupt(
                saver,
                ctx,
                next_planned,
                InterruptState {
                    node_id: node.as_str().to_string(),
                    task_id: None,
                    value: None,
                    step,
                    path: vec![node.as_str().to_string()],
                    resume_values: None,
                },
            )
            .await?;
            return Ok(StepOutcome::Paused { config, reason: PauseReason::StaticAfter });
        }
    }

    let updated_channels = ctx.channels.updated_in_step(step);
    let checkpoint_id = Uuid::new_v4().to_string();
    let mut metadata = CheckpointMetadata::new(CheckpointSource::Loop, step);
    if let Some(parent) = &ctx.parent_checkpoint_id {
        metadata.parents.insert(ctx.config.namespace.clone(), parent.clone());
    }

    let checkpoint = ctx.build_checkpoint(checkpoint_id.clone(), Vec::new(), Vec::new());
    let new_versions = checkpoint.channel_versions.clone();

    if let Err(err) = saver
        .put_full(PutFullRequest {
            config: ctx.config.clone(),
            checkpoint,
            metadata,
            new_versions,
            pending_writes,
        })
        .await
    {
        // Best-effort durability: a transient saver failure does not stop
        // the run (spec §4.4 "Failure semantics", §7).
        warn!(error = %err, "checkpoint persistence failed; continuing run");
    } else {
        ctx.parent_checkpoint_id = Some(checkpoint_id.clone());
        ctx.config = ctx.config.clone().with_checkpoint_id(checkpoint_id);
        emit_lifecycle(
            ctx,
            LifecycleEvent::new(LifecycleKind::CheckpointCommitted, format!("checkpoint {checkpoint_id} committed"))
                .with_step(step)
                .with_updated_keys(updated_channels.clone()),
        );
    }

    let next_planned = plan(graph, ctx);
    let quiescent = next_planned.is_empty();
    emit_lifecycle(ctx, LifecycleEvent::new(LifecycleKind::StepComplete, format!("step {step} complete")).with_step(step));

    Ok(StepOutcome::Completed(StepReport { step, ran_nodes, updated_channels, quiescent }))
}

/// Folds one node's output into the run: merges its state update via the
/// schema's reducers, applies its routing effects to channels (explicit
/// `Command`s first, falling back to static direct/conditional edges),
/// updates join barrier channels, and records pending writes for the
/// updated fields (spec §4.4.e).
fn apply_partial(
    graph: &Graph,
    ctx: &mut ExecutionContext,
    node: &NodeId,
    task_id: &str,
    partial: NodePartial,
    pending_writes: &mut Vec<PendingWrite>,
) {
    if let Some(update) = &partial.update {
        let update_state = State::from_map(update.clone());
        let merged = ctx.state.apply_update(graph.schema(), &update_state);
        ctx.state = merged;
        for (field, value) in update.iter() {
            pending_writes.push(PendingWrite {
                task_id: task_id.to_string(),
                channel: format!("field:{field}"),
                value: value.clone(),
                sequence: ctx.next_write_sequence(),
                task_path: Some(node.as_str().to_string()),
            });
        }
        emit_lifecycle(
            ctx,
            LifecycleEvent::new(LifecycleKind::StateUpdate, format!("{node} updated state"))
                .with_node(node.as_str())
                .with_step(ctx.step)
                .with_updated_keys(update.keys().cloned().collect()),
        );
    }

    let mut explicit_goto = false;
    if let Some(commands) = &partial.commands {
        for command in commands {
            match command {
                Command::GoTo(symbol) => {
                    explicit_goto = true;
                    route(graph, ctx, node, symbol, pending_writes, task_id);
                }
                Command::RouteWithValue(symbol, value) => {
                    explicit_goto = true;
                    if let Some(target) = graph.resolve_symbol(node, symbol) {
                        ctx.push_interrupt_input(&target, value.clone());
                        route(graph, ctx, node, symbol, pending_writes, task_id);
                    }
                }
                Command::Resume(value) => ctx.resume_value = Some(value.clone()),
                Command::ResumeMap(map) => {
                    for (k, v) in map {
                        ctx.resume_map.insert(k.clone(), v.clone());
                    }
                }
                Command::Update(fields) => {
                    let update_state = State::from_map(fields.clone());
                    ctx.state = ctx.state.apply_update(graph.schema(), &update_state);
                }
            }
        }
    }

    if !explicit_goto {
        if let Some(cond) = graph.conditional_edge(node) {
            for symbol in (cond.condition)(&ctx.state) {
                route(graph, ctx, node, &symbol, pending_writes, task_id);
            }
        } else {
            for target in graph.direct_edges_from(node) {
                let channel = Graph::branch_channel(node, target);
                let write = ChannelWrite::Value(Value::Bool(true));
                if ctx.channels.update(&channel, write, ctx.step) {
                    pending_writes.push(PendingWrite {
                        task_id: task_id.to_string(),
                        channel: channel.as_str().to_string(),
                        value: Value::Bool(true),
                        sequence: ctx.next_write_sequence(),
                        task_path: Some(node.as_str().to_string()),
                    });
                    emit_lifecycle(
                        ctx,
                        LifecycleEvent::new(LifecycleKind::ChannelUpdate, format!("{channel} bumped by {node}"))
                            .with_node(node.as_str())
                            .with_step(ctx.step),
                    );
                }
            }
        }
    }

    for join in graph.joins_by_start(node) {
        let channel = crate::types::ChannelName::join_channel(&join.target, &join.starts);
        let write = ChannelWrite::BarrierSender(node.as_str().to_string());
        if ctx.channels.update(&channel, write, ctx.step) {
            pending_writes.push(PendingWrite {
                task_id: task_id.to_string(),
                channel: channel.as_str().to_string(),
                value: Value::String(node.as_str().to_string()),
                sequence: ctx.next_write_sequence(),
                task_path: Some(node.as_str().to_string()),
            });
            emit_lifecycle(
                ctx,
                LifecycleEvent::new(LifecycleKind::ChannelUpdate, format!("{channel} received join signal from {node}"))
                    .with_node(node.as_str())
                    .with_step(ctx.step),
            );
        }
    }
}

/// Resolves `symbol` via the source node's `ends` map (falling back to a
/// literal node id) and bumps the corresponding branch channel, ensuring
/// the channel exists if the target was never a statically-wired edge.
fn route(graph: &Graph, ctx: &mut ExecutionContext, from: &NodeId, symbol: &str, pending_writes: &mut Vec<PendingWrite>, task_id: &str) {
    let Some(target) = graph.resolve_symbol(from, symbol) else {
        return;
    };
    let channel = Graph::branch_channel(from, &target);
    if !ctx.channels.contains(&channel) {
        ctx.channels.ensure(channel.clone(), &crate::channels::ChannelDef::last_value());
        ctx.dynamic_triggers.entry(channel.clone()).or_default().push(target.clone());
    }
    if ctx.channels.update(&channel, ChannelWrite::Value(Value::Bool(true)), ctx.step) {
        pending_writes.push(PendingWrite {
            task_id: task_id.to_string(),
            channel: channel.as_str().to_string(),
            value: Value::Bool(true),
            sequence: ctx.next_write_sequence(),
            task_path: Some(from.as_str().to_string()),
        });
        emit_lifecycle(
            ctx,
            LifecycleEvent::new(LifecycleKind::ChannelUpdate, format!("{channel} bumped by {from}")).with_node(from.as_str()).with_step(ctx.step),
        );
    }
}

/// Persists the run's opening checkpoint before the first superstep: an
/// "input" checkpoint for a fresh run, or a "loop" checkpoint with
/// `isResuming = true` for a run rebuilt from a prior checkpoint (spec
/// §4.4 step 4).
pub(crate) async fn persist_bootstrap(saver: &Arc<dyn Saver>, ctx: &mut ExecutionContext) -> Result<(), SchedulerError> {
    if ctx.bootstrapped {
        return Ok(());
    }
    ctx.bootstrapped = true;
    let checkpoint_id = Uuid::new_v4().to_string();
    let source = if ctx.resumed { CheckpointSource::Loop } else { CheckpointSource::Input };
    let mut metadata = CheckpointMetadata::new(source, ctx.step);
    metadata.is_resuming = Some(ctx.resumed);
    if let Some(parent) = &ctx.parent_checkpoint_id {
        metadata.parents.insert(ctx.config.namespace.clone(), parent.clone());
    }

    let checkpoint = ctx.build_checkpoint(checkpoint_id.clone(), Vec::new(), Vec::new());
    let new_versions = checkpoint.channel_versions.clone();

    if let Err(err) = saver
        .put_full(PutFullRequest {
            config: ctx.config.clone(),
            checkpoint,
            metadata,
            new_versions,
            pending_writes: Vec::new(),
        })
        .await
    {
        warn!(error = %err, "bootstrap checkpoint persistence failed; continuing run");
    } else {
        ctx.parent_checkpoint_id = Some(checkpoint_id.clone());
        ctx.config = ctx.config.clone().with_checkpoint_id(checkpoint_id);
        emit_lifecycle(
            ctx,
            LifecycleEvent::new(LifecycleKind::CheckpointCreated, format!("checkpoint {checkpoint_id} created")).with_step(ctx.step),
        );
    }
    Ok(())
}

async fn persist_interrupt(
    saver: &Arc<dyn Saver>,
    ctx: &mut ExecutionContext,
    next_nodes: Vec<NodeId>,
    interrupt_state: InterruptState,
) -> Result<CheckpointRef, SchedulerError> {
    let checkpoint_id = Uuid::new_v4().to_string();
    let mut metadata = CheckpointMetadata::new(CheckpointSource::Interrupt, ctx.step);
    if let Some(parent) = &ctx.parent_checkpoint_id {
        metadata.parents.insert(ctx.config.namespace.clone(), parent.clone());
    }

    let mut checkpoint = ctx.build_checkpoint(
        checkpoint_id.clone(),
        next_nodes.iter().map(|n| n.as_str().to_string()).collect(),
        Vec::new(),
    );
    checkpoint.interrupt_state = Some(interrupt_state);
    let new_versions = checkpoint.channel_versions.clone();

    let saved = saver
        .put_full(PutFullRequest {
            config: ctx.config.clone(),
            checkpoint,
            metadata,
            new_versions,
            pending_writes: Vec::new(),
        })
        .await?;

    ctx.parent_checkpoint_id = Some(checkpoint_id.clone());
    ctx.config = saved.clone();
    emit_lifecycle(
        ctx,
        LifecycleEvent::new(LifecycleKind::CheckpointInterrupt, format!("checkpoint {checkpoint_id} interrupted")).with_step(ctx.step),
    );
    Ok(saved)
}

/// Persists an "interrupt" checkpoint for a caller-driven external pause,
/// with `nextNodes` set to whatever would have been planned next (spec
/// §4.5 "External").
pub(crate) async fn persist_pause(
    graph: &Graph,
    saver: &Arc<dyn Saver>,
    ctx: &mut ExecutionContext,
    reason: PauseReason,
) -> Result<CheckpointRef, SchedulerError> {
    let planned = plan(graph, ctx);
    let interrupt_state = InterruptState {
        node_id: planned.first().map(|n| n.as_str().to_string()).unwrap_or_default(),
        task_id: None,
        value: None,
        step: ctx.step,
        path: planned.iter().map(|n| n.as_str().to_string()).collect(),
        resume_values: None,
    };
    let config = persist_interrupt(saver, ctx, planned, interrupt_state).await?;
    let _ = reason;
    Ok(config)
}

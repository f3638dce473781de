//! The Pregel-style bulk-synchronous-parallel scheduler: plan, dispatch,
//! collect, persist, advance (spec §4.4).

pub mod context;
pub mod interrupt;
pub mod step;

pub use context::ExecutionContext;
pub use interrupt::{InterruptKind, PauseReason, RunCancellation};
pub use step::{StepOutcome, StepReport};

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::checkpoint::{CheckpointerError, Saver};
use crate::event_bus::{Event, LifecycleEvent, LifecycleKind};
use crate::graph::Graph;
use crate::node::NodeError;
use crate::types::{CheckpointRef, NodeId};

#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error("node {node_id} failed at step {step}: {source}")]
    #[diagnostic(code(latticeflow::scheduler::node_run))]
    NodeRun {
        node_id: NodeId,
        step: u64,
        #[source]
        source: NodeError,
    },

    #[error("node task join failed: {0}")]
    #[diagnostic(code(latticeflow::scheduler::join))]
    Join(String),

    #[error("step {step} exceeded configured max_steps ({max_steps})")]
    #[diagnostic(
        code(latticeflow::scheduler::max_steps_exceeded),
        help("Raise `RuntimeConfig::max_steps` or check for an unintended routing cycle.")
    )]
    MaxStepsExceeded { step: u64, max_steps: u64 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpointer(#[from] CheckpointerError),
}

/// Drives a [`Graph`] to completion (or a pause), persisting a checkpoint
/// after every superstep via the configured [`Saver`].
pub struct Scheduler {
    graph: Arc<Graph>,
    saver: Arc<dyn Saver>,
}

impl Scheduler {
    pub fn new(graph: Arc<Graph>, saver: Arc<dyn Saver>) -> Self {
        Self { graph, saver }
    }

    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// Runs a fresh [`ExecutionContext`] (or one resumed from a checkpoint)
    /// to completion or the next pause point, persisting a checkpoint after
    /// every superstep.
    #[instrument(skip(self, ctx, cancellation), fields(lineage = %ctx.config().lineage_id))]
    pub async fn run(
        &self,
        ctx: &mut ExecutionContext,
        cancellation: Option<&RunCancellation>,
    ) -> Result<StepOutcome, SchedulerError> {
        step::persist_bootstrap(&self.saver, ctx).await?;

        loop {
            if let Some(cancellation) = cancellation {
                if cancellation.is_requested() {
                    let config = self.persist_external_pause(ctx).await?;
                    return Ok(StepOutcome::Paused {
                        config,
                        reason: PauseReason::External,
                    });
                }
            }

            match step::run_superstep(&self.graph, &self.saver, ctx, cancellation).await? {
                StepOutcome::Completed(report) if report.quiescent => {
                    let _ = ctx.event_emitter.emit(Event::Lifecycle(
                        LifecycleEvent::new(LifecycleKind::GraphComplete, format!("run quiesced after {} steps", ctx.step)).with_step(ctx.step),
                    ));
                    return Ok(StepOutcome::Completed(report));
                }
                StepOutcome::Completed(_) => continue,
                paused @ StepOutcome::Paused { .. } => return Ok(paused),
            }
        }
    }

    async fn persist_external_pause(&self, ctx: &mut ExecutionContext) -> Result<CheckpointRef, SchedulerError> {
        step::persist_pause(&self.graph, &self.saver, ctx, interrupt::PauseReason::External).await
    }
}

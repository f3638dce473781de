//! Crate-wide `Result` alias and the top-level error enum composing every
//! subsystem's error type (spec §7).

use miette::Diagnostic;
use thiserror::Error;

use crate::channels::ChannelError;
use crate::checkpoint::CheckpointerError;
use crate::graph::GraphCompileError;
use crate::node::NodeError;
use crate::scheduler::SchedulerError;
use crate::state::reducers::ReducerError;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Composition of every subsystem error a caller driving a run may observe.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    GraphCompile(#[from] GraphCompileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reducer(#[from] ReducerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpointer(#[from] CheckpointerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Node(#[from] NodeError),
}

//! # latticeflow: a durable, resumable Pregel-style graph execution engine
//!
//! `latticeflow` runs a user-defined directed graph of computational nodes
//! as a series of bulk-synchronous-parallel (BSP) supersteps: each step
//! plans which nodes are eligible based on versioned channel triggers,
//! dispatches them concurrently, merges their outputs into a typed state
//! via per-field reducers, and persists a checkpoint before advancing.
//! Runs can be interrupted, resumed from any persisted checkpoint, forked
//! for time-travel, and replayed deterministically.
//!
//! ## Core Concepts
//!
//! - **State & Schema** ([`state`]): an ordered field→value map merged
//!   deterministically by per-field reducers (overwrite, append, merge).
//! - **Channels** ([`channels`]): named, versioned communication slots
//!   (`LastValue`, `Topic`, `Ephemeral`, `Barrier`) that trigger nodes.
//! - **Graph** ([`graph`]): the immutable, compiled description of nodes,
//!   edges, triggers, entry/finish points, and per-node `ends`.
//! - **Node** ([`node`]): the uniform, opaque function contract every node
//!   body implements.
//! - **Checkpoint & Saver** ([`checkpoint`]): immutable checkpoint records
//!   plus a pluggable storage contract (in-memory and SQL-backed savers
//!   ship with the crate).
//! - **Scheduler** ([`scheduler`]): the BSP loop itself — plan, dispatch,
//!   collect, persist, advance — along with static/dynamic/external
//!   interrupt handling.
//! - **Time travel** ([`time_travel`]): read-only history queries plus a
//!   controlled `edit_state` that forks a new checkpoint from a prior one.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use serde_json::json;
//!
//! use latticeflow::checkpoint::InMemorySaver;
//! use latticeflow::event_bus::EventBus;
//! use latticeflow::graph::GraphBuilder;
//! use latticeflow::node::{Node, NodeContext, NodeError, NodePartial};
//! use latticeflow::scheduler::{ExecutionContext, Scheduler, StepOutcome};
//! use latticeflow::state::reducers::ReducerKind;
//! use latticeflow::state::{StateSchema, StateSnapshot};
//! use latticeflow::types::CheckpointRef;
//!
//! struct Increment;
//!
//! #[async_trait]
//! impl Node for Increment {
//!     async fn run(&self, snapshot: StateSnapshot, _ctx: NodeContext) -> Result<NodePartial, NodeError> {
//!         let counter = snapshot.get("counter").and_then(|v| v.as_i64()).unwrap_or(0);
//!         Ok(NodePartial::new().with_field("counter", json!(counter + 1)))
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = StateSchema::new().with_field("counter", ReducerKind::Overwrite, json!(0));
//! let graph = Arc::new(
//!     GraphBuilder::new()
//!         .with_schema(schema)
//!         .add_node("increment", Increment)
//!         .set_entry("increment")
//!         .add_finish_point("increment")
//!         .compile()?,
//! );
//!
//! let saver = Arc::new(InMemorySaver::new());
//! let scheduler = Scheduler::new(graph.clone(), saver);
//! let bus = EventBus::default();
//! let mut ctx = ExecutionContext::fresh(&graph, CheckpointRef::new("run-1"), bus.get_emitter(), 100);
//!
//! match scheduler.run(&mut ctx, None).await? {
//!     StepOutcome::Completed(_) => println!("counter = {:?}", ctx.state().get("counter")),
//!     StepOutcome::Paused { .. } => println!("paused"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`types`] — `NodeId`/`ChannelName` newtypes and the reserved state-key
//!   wire contract
//! - [`state`] — typed state, schema, and reducers
//! - [`channels`] — the channel layer and per-run `ChannelManager`
//! - [`graph`] — compiled graph, builder, edges, compilation
//! - [`node`] — the `Node` trait, `NodeContext`, `Command`, `NodePartial`
//! - [`checkpoint`] — checkpoint model and the `Saver` contract
//! - [`scheduler`] — the BSP loop, `ExecutionContext`, interrupts
//! - [`time_travel`] — history queries and `edit_state`
//! - [`cache`] — the namespaced KV collaborator contract
//! - [`event_bus`] — event fan-out, sinks, subscriber API
//! - [`telemetry`] — plain-text rendering of events and error chains
//! - [`utils`] — JSON deep-copy/merge helpers, id generation

pub mod cache;
pub mod channels;
pub mod checkpoint;
pub mod error;
pub mod event_bus;
pub mod graph;
pub mod node;
pub mod scheduler;
pub mod state;
pub mod telemetry;
pub mod time_travel;
pub mod types;
pub mod utils;

pub use error::{EngineError, Result};

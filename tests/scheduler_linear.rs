//! End-to-end BSP run over a two-node linear graph: increment then
//! double, driven to completion through the public `Scheduler` API.

mod common;

use std::sync::Arc;

use common::{Double, Increment};
use latticeflow::checkpoint::{InMemorySaver, Saver};
use latticeflow::event_bus::EventBus;
use latticeflow::graph::GraphBuilder;
use latticeflow::scheduler::{ExecutionContext, Scheduler, StepOutcome};
use latticeflow::state::reducers::ReducerKind;
use latticeflow::state::StateSchema;
use latticeflow::types::CheckpointRef;
use serde_json::json;

fn build() -> Arc<latticeflow::graph::Graph> {
    let schema = StateSchema::new().with_field("counter", ReducerKind::Overwrite, json!(0));
    Arc::new(
        GraphBuilder::new()
            .with_schema(schema)
            .add_node("increment", Increment)
            .add_node("double", Double)
            .set_entry("increment")
            .add_edge("increment", "double")
            .add_finish_point("double")
            .compile()
            .unwrap(),
    )
}

#[tokio::test]
async fn increment_then_double_runs_to_completion() {
    let graph = build();
    let saver: Arc<dyn Saver> = Arc::new(InMemorySaver::new());
    let scheduler = Scheduler::new(graph.clone(), saver);
    let bus = EventBus::default();
    bus.listen_for_events();
    let mut ctx = ExecutionContext::fresh(&graph, CheckpointRef::new("lineage-linear"), bus.get_emitter(), 10);

    let outcome = scheduler.run(&mut ctx, None).await.unwrap();
    match outcome {
        StepOutcome::Completed(report) => {
            assert!(report.quiescent);
            assert_eq!(ctx.state().get("counter"), Some(&json!(2)));
        }
        StepOutcome::Paused { .. } => panic!("expected the run to complete without pausing"),
    }
}

#[tokio::test]
async fn a_checkpoint_is_persisted_after_each_superstep() {
    let graph = build();
    let saver = Arc::new(InMemorySaver::new());
    let scheduler = Scheduler::new(graph.clone(), saver.clone() as Arc<dyn Saver>);
    let bus = EventBus::default();
    bus.listen_for_events();
    let config = CheckpointRef::new("lineage-persisted");
    let mut ctx = ExecutionContext::fresh(&graph, config.clone(), bus.get_emitter(), 10);

    scheduler.run(&mut ctx, None).await.unwrap();

    let latest = saver.get_tuple(&config).await.unwrap();
    let tuple = latest.expect("a checkpoint should have been saved");
    assert_eq!(tuple.checkpoint.channel_values.get("counter"), Some(&json!(2)));
}

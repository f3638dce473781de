//! Fan-out / replay: a node that routes `K` values to the same target via
//! `RouteWithValue` must have that target run exactly `K` times, once per
//! queued value, rather than collapsing into a single invocation.

mod common;

use std::sync::Arc;

use common::{FanInCollect, FanOutSplit};
use latticeflow::checkpoint::InMemorySaver;
use latticeflow::event_bus::EventBus;
use latticeflow::graph::GraphBuilder;
use latticeflow::scheduler::{ExecutionContext, Scheduler, StepOutcome};
use latticeflow::state::reducers::ReducerKind;
use latticeflow::state::StateSchema;
use latticeflow::types::CheckpointRef;
use serde_json::json;

fn build() -> Arc<latticeflow::graph::Graph> {
    let schema = StateSchema::new().with_field("received", ReducerKind::Append, json!([]));

    Arc::new(
        GraphBuilder::new()
            .with_schema(schema)
            .add_node("split", FanOutSplit)
            .add_node("collect", FanInCollect)
            .set_entry("split")
            .add_edge("split", "collect")
            .add_finish_point("collect")
            .compile()
            .unwrap(),
    )
}

#[tokio::test]
async fn fan_out_target_runs_once_per_queued_value() {
    let graph = build();
    let saver = Arc::new(InMemorySaver::new());
    let scheduler = Scheduler::new(graph.clone(), saver);
    let bus = EventBus::default();
    bus.listen_for_events();
    let mut ctx = ExecutionContext::fresh(&graph, CheckpointRef::new("lineage-fanout"), bus.get_emitter(), 10);

    let outcome = scheduler.run(&mut ctx, None).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Completed(report) if report.quiescent));

    let received = ctx.state().get("received").cloned().unwrap_or(json!([]));
    let received = received.as_array().cloned().unwrap_or_default();
    assert_eq!(received, vec![json!(1), json!(2)], "collect must run once per queued fan-out value, in order");
}

//! Join barrier: `join` only becomes eligible once both `left` and
//! `right` have fired, regardless of which one runs first in a step.

mod common;

use std::sync::Arc;

use common::Log;
use latticeflow::checkpoint::InMemorySaver;
use latticeflow::event_bus::EventBus;
use latticeflow::graph::GraphBuilder;
use latticeflow::scheduler::{ExecutionContext, Scheduler, StepOutcome};
use latticeflow::state::reducers::ReducerKind;
use latticeflow::state::StateSchema;
use latticeflow::types::{CheckpointRef, NodeId};
use serde_json::json;

fn build() -> Arc<latticeflow::graph::Graph> {
    let schema = StateSchema::new().with_field("visited", ReducerKind::Append, json!([]));

    Arc::new(
        GraphBuilder::new()
            .with_schema(schema)
            .add_node("left", Log { id: "left" })
            .add_node("right", Log { id: "right" })
            .add_node("join", Log { id: "join" })
            .set_entry("left")
            .add_edge("left", "right")
            .add_join_edge("join", vec![NodeId::from("left"), NodeId::from("right")])
            .add_finish_point("join")
            .compile()
            .unwrap(),
    )
}

#[tokio::test]
async fn join_waits_for_both_starts_before_running() {
    let graph = build();
    let saver = Arc::new(InMemorySaver::new());
    let scheduler = Scheduler::new(graph.clone(), saver);
    let bus = EventBus::default();
    bus.listen_for_events();
    let mut ctx = ExecutionContext::fresh(&graph, CheckpointRef::new("lineage-join"), bus.get_emitter(), 10);

    let outcome = scheduler.run(&mut ctx, None).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Completed(report) if report.quiescent));

    let visited = ctx.state().get("visited").cloned().unwrap_or(json!([]));
    let visited = visited.as_array().cloned().unwrap_or_default();
    assert_eq!(visited, vec![json!("left"), json!("right"), json!("join")]);
}

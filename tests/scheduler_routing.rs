//! Conditional, symbolic routing: a node resolves `GoTo("even"/"odd")`
//! through its own `ends` map rather than a statically wired edge.

mod common;

use std::sync::Arc;

use common::{Increment, Log, ParityRouter};
use latticeflow::checkpoint::InMemorySaver;
use latticeflow::event_bus::EventBus;
use latticeflow::graph::GraphBuilder;
use latticeflow::scheduler::{ExecutionContext, Scheduler, StepOutcome};
use latticeflow::state::reducers::ReducerKind;
use latticeflow::state::StateSchema;
use latticeflow::types::CheckpointRef;
use rustc_hash::FxHashMap;
use serde_json::json;

fn build() -> Arc<latticeflow::graph::Graph> {
    let schema = StateSchema::new()
        .with_field("counter", ReducerKind::Overwrite, json!(0))
        .with_field("visited", ReducerKind::Append, json!([]));

    let mut ends = FxHashMap::default();
    ends.insert("even".to_string(), "log-even".into());
    ends.insert("odd".to_string(), "log-odd".into());

    Arc::new(
        GraphBuilder::new()
            .with_schema(schema)
            .add_node("increment", Increment)
            .add_node("router", ParityRouter)
            .add_node("log-even", Log { id: "log-even" })
            .add_node("log-odd", Log { id: "log-odd" })
            .set_entry("increment")
            .add_edge("increment", "router")
            .with_ends("router", ends)
            .add_finish_point("log-even")
            .add_finish_point("log-odd")
            .compile()
            .unwrap(),
    )
}

#[tokio::test]
async fn router_follows_the_ends_map_for_its_symbol() {
    let graph = build();
    let saver = Arc::new(InMemorySaver::new());
    let scheduler = Scheduler::new(graph.clone(), saver);
    let bus = EventBus::default();
    bus.listen_for_events();
    let mut ctx = ExecutionContext::fresh(&graph, CheckpointRef::new("lineage-routing"), bus.get_emitter(), 10);

    let outcome = scheduler.run(&mut ctx, None).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Completed(report) if report.quiescent));

    // counter starts at 0, incremented to 1 (odd) -> routes to log-odd.
    assert_eq!(ctx.state().get("counter"), Some(&json!(1)));
    assert_eq!(ctx.state().get("visited"), Some(&json!(["log-odd"])));
}

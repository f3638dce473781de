//! Time travel against a real run: inspect history, fork a checkpoint
//! with an edited field, and resume the scheduler from the fork.

mod common;

use std::sync::Arc;

use common::Increment;
use latticeflow::checkpoint::InMemorySaver;
use latticeflow::event_bus::EventBus;
use latticeflow::graph::GraphBuilder;
use latticeflow::scheduler::{ExecutionContext, Scheduler, StepOutcome};
use latticeflow::state::reducers::ReducerKind;
use latticeflow::state::StateSchema;
use latticeflow::time_travel::{edit_state, get_state, history, EditOptions};
use latticeflow::types::CheckpointRef;
use rustc_hash::FxHashMap;
use serde_json::json;

fn build() -> Arc<latticeflow::graph::Graph> {
    let schema = StateSchema::new().with_field("counter", ReducerKind::Overwrite, json!(0));
    Arc::new(
        GraphBuilder::new()
            .with_schema(schema)
            .add_node("increment", Increment)
            .set_entry("increment")
            .add_finish_point("increment")
            .compile()
            .unwrap(),
    )
}

#[tokio::test]
async fn edit_state_forks_a_run_and_resume_continues_from_the_fork() {
    let graph = build();
    let saver: Arc<dyn latticeflow::checkpoint::Saver> = Arc::new(InMemorySaver::new());
    let scheduler = Scheduler::new(graph.clone(), saver.clone());
    let bus = EventBus::default();
    bus.listen_for_events();
    let config = CheckpointRef::new("lineage-time-travel");
    let mut ctx = ExecutionContext::fresh(&graph, config.clone(), bus.get_emitter(), 10);

    let outcome = scheduler.run(&mut ctx, None).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Completed(report) if report.quiescent));
    assert_eq!(ctx.state().get("counter"), Some(&json!(1)));

    let entries = history(&saver, &config, None).await.unwrap();
    assert!(!entries.is_empty(), "a completed run should have left at least one checkpoint");
    let latest = entries.first().unwrap().config.clone();

    let view = get_state(&saver, graph.schema(), &latest).await.unwrap();
    assert_eq!(view.state.get("counter"), Some(&json!(1)));

    let mut patch = FxHashMap::default();
    patch.insert("counter".to_string(), json!(100));
    let forked = edit_state(&saver, graph.schema(), &latest, patch, EditOptions::default()).await.unwrap();
    assert_ne!(forked.checkpoint_id, latest.checkpoint_id);

    let forked_tuple = saver.get_tuple(&forked).await.unwrap().unwrap();
    let mut resumed = ExecutionContext::from_tuple(&graph, forked_tuple, bus.get_emitter(), 10);
    // The forked checkpoint carries no pending plan (the run it forked
    // from had already quiesced), so re-prime the entry channel the same
    // way a fresh run does before continuing it.
    use latticeflow::channels::ChannelWrite;
    resumed
        .channels()
        .update(&latticeflow::graph::Graph::entry_channel(), ChannelWrite::Value(json!(true)), resumed.step());

    let outcome = scheduler.run(&mut resumed, None).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Completed(report) if report.quiescent));
    assert_eq!(resumed.state().get("counter"), Some(&json!(101)));
}

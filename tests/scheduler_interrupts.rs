//! Static and dynamic interrupt handling: pausing before/after a node,
//! and resuming a dynamic interrupt with a caller-supplied value.

mod common;

use std::sync::Arc;

use common::{AskApproval, Increment, SlowNode};
use latticeflow::checkpoint::InMemorySaver;
use latticeflow::event_bus::EventBus;
use latticeflow::graph::GraphBuilder;
use latticeflow::scheduler::interrupt::PauseReason;
use latticeflow::scheduler::{ExecutionContext, Scheduler, StepOutcome};
use latticeflow::state::reducers::ReducerKind;
use latticeflow::state::StateSchema;
use latticeflow::types::CheckpointRef;
use serde_json::json;

fn counter_graph_with_static_interrupt() -> Arc<latticeflow::graph::Graph> {
    let schema = StateSchema::new().with_field("counter", ReducerKind::Overwrite, json!(0));
    Arc::new(
        GraphBuilder::new()
            .with_schema(schema)
            .add_node("increment", Increment)
            .set_entry("increment")
            .add_finish_point("increment")
            .with_interrupt_before("increment")
            .compile()
            .unwrap(),
    )
}

#[tokio::test]
async fn static_before_interrupt_pauses_then_resumes_on_replay() {
    let graph = counter_graph_with_static_interrupt();
    let saver = Arc::new(InMemorySaver::new());
    let scheduler = Scheduler::new(graph.clone(), saver.clone());
    let bus = EventBus::default();
    bus.listen_for_events();
    let config = CheckpointRef::new("lineage-static-before");
    let mut ctx = ExecutionContext::fresh(&graph, config.clone(), bus.get_emitter(), 10);

    let outcome = scheduler.run(&mut ctx, None).await.unwrap();
    let paused_config = match outcome {
        StepOutcome::Paused { config, reason } => {
            assert_eq!(reason, PauseReason::StaticBefore);
            config
        }
        StepOutcome::Completed(_) => panic!("expected the run to pause before `increment`"),
    };
    assert_eq!(ctx.state().get("counter"), Some(&json!(0)));

    let tuple = saver.get_tuple(&paused_config).await.unwrap().expect("pause checkpoint saved");
    let mut resumed = ExecutionContext::from_tuple(&graph, tuple, bus.get_emitter(), 10);
    let outcome = scheduler.run(&mut resumed, None).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Completed(report) if report.quiescent));
    assert_eq!(resumed.state().get("counter"), Some(&json!(1)));
}

fn approval_graph() -> Arc<latticeflow::graph::Graph> {
    let schema = StateSchema::new();
    Arc::new(
        GraphBuilder::new()
            .with_schema(schema)
            .add_node(
                "approve",
                AskApproval {
                    payload: json!({"question": "proceed?"}),
                },
            )
            .set_entry("approve")
            .add_finish_point("approve")
            .compile()
            .unwrap(),
    )
}

#[tokio::test]
async fn dynamic_interrupt_resumes_with_caller_supplied_value() {
    let graph = approval_graph();
    let saver = Arc::new(InMemorySaver::new());
    let scheduler = Scheduler::new(graph.clone(), saver.clone());
    let bus = EventBus::default();
    bus.listen_for_events();
    let config = CheckpointRef::new("lineage-dynamic");
    let mut ctx = ExecutionContext::fresh(&graph, config.clone(), bus.get_emitter(), 10);

    let outcome = scheduler.run(&mut ctx, None).await.unwrap();
    let paused_config = match outcome {
        StepOutcome::Paused { config, reason } => {
            assert_eq!(reason, PauseReason::Dynamic);
            config
        }
        StepOutcome::Completed(_) => panic!("expected `approve` to raise a dynamic interrupt"),
    };

    let tuple = saver.get_tuple(&paused_config).await.unwrap().expect("interrupt checkpoint saved");
    let mut resumed = ExecutionContext::from_tuple(&graph, tuple, bus.get_emitter(), 10);
    resumed.set_resume_value(json!("approved"));
    let outcome = scheduler.run(&mut resumed, None).await.unwrap();
    assert!(matches!(outcome, StepOutcome::Completed(report) if report.quiescent));
    assert_eq!(resumed.state().get("resumed_with"), Some(&json!("approved")));
}

#[tokio::test]
async fn external_cancellation_pauses_before_the_next_superstep() {
    // No interrupt_before wired here; cancellation alone drives the pause.
    let schema = StateSchema::new().with_field("counter", ReducerKind::Overwrite, json!(0));
    let graph = Arc::new(
        GraphBuilder::new()
            .with_schema(schema)
            .add_node("increment", Increment)
            .set_entry("increment")
            .add_finish_point("increment")
            .compile()
            .unwrap(),
    );

    let saver = Arc::new(InMemorySaver::new());
    let scheduler = Scheduler::new(graph.clone(), saver);
    let bus = EventBus::default();
    bus.listen_for_events();
    let mut ctx = ExecutionContext::fresh(&graph, CheckpointRef::new("lineage-external"), bus.get_emitter(), 10);

    let cancellation = latticeflow::scheduler::RunCancellation::new();
    cancellation.request();
    let outcome = scheduler.run(&mut ctx, Some(&cancellation)).await.unwrap();
    match outcome {
        StepOutcome::Paused { reason, .. } => assert_eq!(reason, PauseReason::External),
        StepOutcome::Completed(_) => panic!("expected the pre-requested cancellation to pause the run immediately"),
    }
    // The run never advanced past its opening checkpoint.
    assert_eq!(ctx.state().get("counter"), Some(&json!(0)));
}

#[tokio::test]
async fn hard_timeout_force_cancels_an_in_flight_node_and_queues_it_for_replay() {
    use std::time::Duration;

    let schema = StateSchema::new();
    let graph = Arc::new(
        GraphBuilder::new()
            .with_schema(schema)
            .add_node(
                "slow",
                SlowNode {
                    delay: Duration::from_secs(60),
                },
            )
            .set_entry("slow")
            .add_finish_point("slow")
            .compile()
            .unwrap(),
    );

    let saver = Arc::new(InMemorySaver::new());
    let scheduler = Scheduler::new(graph.clone(), saver);
    let bus = EventBus::default();
    bus.listen_for_events();
    let mut ctx = ExecutionContext::fresh(&graph, CheckpointRef::new("lineage-hard-timeout"), bus.get_emitter(), 10);

    // A short grace period: `slow` is dispatched, then the watcher requests
    // cancellation almost immediately, well before its 60s sleep elapses.
    let cancellation = latticeflow::scheduler::RunCancellation::with_timeout(Duration::from_millis(20));
    let watcher = {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cancellation.request();
        })
    };

    let outcome = tokio::time::timeout(Duration::from_secs(5), scheduler.run(&mut ctx, Some(&cancellation)))
        .await
        .expect("forced cancellation must not make the run hang")
        .unwrap();
    watcher.await.unwrap();

    match outcome {
        StepOutcome::Paused { reason, .. } => assert_eq!(reason, PauseReason::External),
        StepOutcome::Completed(_) => panic!("expected the forced timeout to pause the run before `slow` finished"),
    }
    // `slow` never got to write `finished`: it was aborted mid-sleep.
    assert_eq!(ctx.state().get("finished"), None);
}

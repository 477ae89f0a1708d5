//! Concurrency-group supersession and cancellation.

use gantry_core::context::RunContext;
use gantry_core::events::Event;
use gantry_core::run::{CancelReason, JobStatus, RunStatus};
use gantry_core::workflow::TriggerType;
use gantry_tests::{next_event, succeed, succeed_with_outputs, GroupFixture, TestHarness, WorkflowFixture};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_new_run_supersedes_in_flight_run_with_same_key() {
    let harness = TestHarness::new();
    let mut events = harness.subscribe("run.cancelled.>").await;

    let definition = WorkflowFixture::router();
    let context = RunContext::new(TriggerType::PullRequest).with_ref("refs/pull/42");

    let first = harness
        .start_with_context(&definition, context.clone())
        .await;
    // First run is still in flight when the second one arrives.
    let second = harness
        .start_with_context(&definition, context)
        .await;

    let cancelled = harness.run(first).await;
    assert_eq!(cancelled.status, RunStatus::Cancelled);
    assert!(
        cancelled
            .jobs
            .iter()
            .all(|j| j.status == JobStatus::Cancelled)
    );

    match next_event(&mut events).await {
        Event::RunCancelled(p) => {
            assert_eq!(p.run_id, first);
            assert_eq!(p.reason, CancelReason::Superseded);
            assert_eq!(p.superseded_by, Some(second));
        }
        other => panic!("expected RunCancelled, got {:?}", other),
    }

    // The superseding run proceeds normally.
    let groups = GroupFixture::encoded(&["tls"]);
    let run = harness
        .drive(second, |job, _| {
            if job.name == "collect-integration-tests" {
                succeed_with_outputs(&[("collect.groups", &groups)])
            } else {
                succeed()
            }
        })
        .await;
    assert_eq!(run.status, RunStatus::Success);
}

#[tokio::test]
async fn test_different_keys_do_not_supersede() {
    let harness = TestHarness::new();
    let definition = WorkflowFixture::router();

    let first = harness
        .start_with_context(
            &definition,
            RunContext::new(TriggerType::PullRequest).with_ref("refs/pull/1"),
        )
        .await;
    let _second = harness
        .start_with_context(
            &definition,
            RunContext::new(TriggerType::PullRequest).with_ref("refs/pull/2"),
        )
        .await;

    let run = harness.run(first).await;
    assert_ne!(run.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn test_user_cancel_stops_queued_work() {
    let harness = TestHarness::new();
    let run_id = harness
        .start(&WorkflowFixture::router(), TriggerType::Manual)
        .await;

    // One root job starts; the rest stay queued.
    let running = harness
        .coordinator
        .next_instance()
        .await
        .unwrap()
        .expect("a root job should be runnable");

    harness
        .coordinator
        .cancel_run(run_id, CancelReason::UserRequested, None)
        .await
        .unwrap();

    let run = harness.run(run_id).await;
    assert_eq!(run.status, RunStatus::Cancelled);
    assert!(run.jobs.iter().all(|j| j.status == JobStatus::Cancelled));

    // The queue was drained; nothing is left to dispatch.
    assert!(harness.coordinator.next_instance().await.unwrap().is_none());

    // A straggling completion for the running instance is ignored.
    harness
        .coordinator
        .instance_completed(run_id, running.job_id, succeed())
        .await
        .unwrap();
    assert_eq!(harness.run(run_id).await.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_unknown_run_is_an_error() {
    let harness = TestHarness::new();
    let result = harness
        .coordinator
        .cancel_run(
            gantry_core::ids::RunId::new(),
            CancelReason::UserRequested,
            None,
        )
        .await;
    assert!(result.is_err());
}

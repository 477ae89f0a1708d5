//! Fan-out behavior: group x matrix expansion, stability filtering,
//! empty expansions, and failure isolation.

use gantry_core::context::StabilityFilter;
use gantry_core::events::Event;
use gantry_core::run::{FailureKind, JobStatus, RunStatus};
use gantry_core::workflow::TriggerType;
use gantry_scheduler::collector::GroupCollector;
use gantry_tests::{
    fail, next_event, succeed, succeed_with_outputs, GroupFixture, TestHarness, WorkflowFixture,
};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_fan_out_expands_groups_times_matrix() {
    let harness = TestHarness::new();
    let mut events = harness.subscribe("run.*.fanout.>").await;

    let run_id = harness
        .start(&WorkflowFixture::router(), TriggerType::PullRequest)
        .await;

    let groups = GroupFixture::encoded(&["database-relations", "tls", "backup"]);
    let run = harness
        .drive(run_id, |job, _| {
            if job.name == "collect-integration-tests" {
                succeed_with_outputs(&[("collect.groups", &groups)])
            } else {
                succeed()
            }
        })
        .await;

    // 3 groups x 2 series values.
    let instances = run.instances_of("integration-test");
    assert_eq!(instances.len(), 6);
    assert_eq!(run.status, RunStatus::Success);

    match next_event(&mut events).await {
        Event::FanOutExpanded(p) => {
            assert_eq!(p.group_count, 3);
            assert_eq!(p.matrix_count, 2);
            assert_eq!(p.instance_count, 6);
            assert!(!p.fail_fast);
        }
        other => panic!("expected FanOutExpanded, got {:?}", other),
    }
}

#[tokio::test]
async fn test_every_instance_carries_group_and_filter() {
    let harness = TestHarness::new();
    let run_id = harness
        .start(&WorkflowFixture::router(), TriggerType::PullRequest)
        .await;

    let groups = GroupFixture::encoded(&["tls"]);
    let mut seen_filters = Vec::new();
    let run = harness
        .drive(run_id, |job, exec| {
            if job.name == "collect-integration-tests" {
                return succeed_with_outputs(&[("collect.groups", &groups)]);
            }
            if job.name == "integration-test" {
                assert_eq!(
                    exec.combination.get("group_name"),
                    Some(&serde_json::json!("tls"))
                );
                assert!(exec.combination.contains_key("series"));
                seen_filters.push(exec.combination.get("stability_filter").cloned());
            }
            succeed()
        })
        .await;

    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(seen_filters.len(), 2);
    // Pull requests exclude unstable groups; every instance got the
    // same pre-computed expression.
    for filter in seen_filters {
        assert_eq!(filter, Some(serde_json::json!("not unstable")));
    }
}

#[tokio::test]
async fn test_schedule_trigger_includes_unstable_groups() {
    let harness = TestHarness::new();
    let run_id = harness
        .start(&WorkflowFixture::router(), TriggerType::Schedule)
        .await;

    let catalog = GroupFixture::catalog();
    let mut integration_instances = 0;
    let run = harness
        .drive(run_id, |job, _| {
            if job.name == "collect-integration-tests" {
                // The collector derives its selection from the run's
                // filter, exactly as `gantry collect` would.
                let filter = StabilityFilter::IncludeUnstable;
                let collection = GroupCollector::new(catalog.clone()).collect(filter);
                assert_eq!(collection.excluded, 0);
                let encoded = collection.encode().unwrap();
                return succeed_with_outputs(&[("collect.groups", &encoded)]);
            }
            if job.name == "integration-test" {
                integration_instances += 1;
            }
            succeed()
        })
        .await;

    assert_eq!(run.context.stability_filter(), StabilityFilter::IncludeUnstable);
    // 4 groups (exporter included) x 2 series.
    assert_eq!(integration_instances, 8);
    assert_eq!(run.status, RunStatus::Success);
}

#[tokio::test]
async fn test_pull_request_excludes_unstable_groups() {
    let harness = TestHarness::new();
    let run_id = harness
        .start(&WorkflowFixture::router(), TriggerType::PullRequest)
        .await;

    let catalog = GroupFixture::catalog();
    let mut integration_instances = 0;
    let run = harness
        .drive(run_id, |job, _| {
            if job.name == "collect-integration-tests" {
                let filter = run_filter_for_pull_request();
                let collection = GroupCollector::new(catalog.clone()).collect(filter);
                assert_eq!(collection.excluded, 1);
                let encoded = collection.encode().unwrap();
                return succeed_with_outputs(&[("collect.groups", &encoded)]);
            }
            if job.name == "integration-test" {
                integration_instances += 1;
            }
            succeed()
        })
        .await;

    // 3 stable groups x 2 series; the unstable exporter group never ran.
    assert_eq!(integration_instances, 6);
    assert_eq!(run.status, RunStatus::Success);
}

fn run_filter_for_pull_request() -> StabilityFilter {
    let context = gantry_core::context::RunContext::new(TriggerType::PullRequest);
    StabilityFilter::for_context(&context)
}

#[tokio::test]
async fn test_empty_fan_out_is_surfaced_not_silent() {
    let harness = TestHarness::new();
    let mut events = harness.subscribe("run.*.fanout.>").await;

    let run_id = harness
        .start(&WorkflowFixture::router(), TriggerType::PullRequest)
        .await;

    let empty = GroupFixture::encoded(&[]);
    let mut integration_ran = false;
    let run = harness
        .drive(run_id, |job, _| {
            if job.name == "integration-test" {
                integration_ran = true;
            }
            if job.name == "collect-integration-tests" {
                succeed_with_outputs(&[("collect.groups", &empty)])
            } else {
                succeed()
            }
        })
        .await;

    assert!(!integration_ran, "no instance should have been scheduled");
    assert_eq!(run.status, RunStatus::Success);
    assert_eq!(
        run.instances_of("integration-test").first().unwrap().status,
        JobStatus::Succeeded
    );

    match next_event(&mut events).await {
        Event::FanOutEmpty(p) => {
            assert_eq!(p.job_name, "integration-test");
            assert_eq!(p.source_job, "collect-integration-tests");
        }
        other => panic!("expected FanOutEmpty, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_collector_skips_fan_out() {
    let harness = TestHarness::new();
    let run_id = harness
        .start(&WorkflowFixture::router(), TriggerType::PullRequest)
        .await;

    let run = harness
        .drive(run_id, |job, _| {
            if job.name == "collect-integration-tests" {
                fail(1)
            } else {
                succeed()
            }
        })
        .await;

    assert_eq!(run.status, RunStatus::Failure);
    assert_eq!(
        run.instances_of("integration-test").first().unwrap().status,
        JobStatus::Skipped
    );
}

#[tokio::test]
async fn test_sibling_failure_does_not_cancel_other_instances() {
    let harness = TestHarness::new();
    let run_id = harness
        .start(&WorkflowFixture::router(), TriggerType::PullRequest)
        .await;

    let groups = GroupFixture::encoded(&["database-relations", "tls", "backup"]);
    let mut executed = 0;
    let run = harness
        .drive(run_id, |job, exec| {
            if job.name == "collect-integration-tests" {
                return succeed_with_outputs(&[("collect.groups", &groups)]);
            }
            if job.name == "integration-test" {
                executed += 1;
                // Fail exactly one combination.
                if exec.combination.get("group_name") == Some(&serde_json::json!("tls"))
                    && exec.combination.get("series") == Some(&serde_json::json!("22.04"))
                {
                    return fail(1);
                }
            }
            succeed()
        })
        .await;

    // All 6 instances executed despite the failure.
    assert_eq!(executed, 6);
    assert_eq!(run.status, RunStatus::Failure);

    let instances = run.instances_of("integration-test");
    let failed = instances
        .iter()
        .filter(|j| j.status == JobStatus::Failed)
        .count();
    let succeeded = instances
        .iter()
        .filter(|j| j.status == JobStatus::Succeeded)
        .count();
    assert_eq!(failed, 1);
    assert_eq!(succeeded, 5);
}

#[tokio::test]
async fn test_timed_out_instance_fails_with_timeout_kind() {
    let harness = TestHarness::new();
    let run_id = harness
        .start(&WorkflowFixture::linear(), TriggerType::Manual)
        .await;

    let run = harness
        .drive(run_id, |job, _| {
            if job.name == "build" {
                gantry_scheduler::coordinator::InstanceOutcome::TimedOut
            } else {
                succeed()
            }
        })
        .await;

    assert_eq!(run.status, RunStatus::Failure);
    let build = run.instances_of("build")[0];
    assert_eq!(build.status, JobStatus::Failed);
    assert_eq!(build.failure, Some(FailureKind::Timeout));
    assert_eq!(
        run.instances_of("test")[0].status,
        JobStatus::Skipped
    );
}

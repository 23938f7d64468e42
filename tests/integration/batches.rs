//! Batch submission and derived status.

use lanework::core::{BatchFile, Params, Priority, TaskKind, TaskSpec, TaskStatus};
use lanework::orchestration::{GateVerdict, HandlerOutcome};
use lanework::Error;

use crate::fixtures::{builder, outcome_from_params, params, WAIT};

fn spec(ok: bool) -> TaskSpec {
    TaskSpec::new(TaskKind::GenerateScript, params("ok", ok))
}

/// Given batches of 1 to 5 tasks that all succeed
/// When they finish
/// Then each batch is Completed with progress 1.0.
#[test]
fn test_all_completed_batches_are_completed() {
    let scheduler = builder(3)
        .handler("generate-script", outcome_from_params)
        .build()
        .unwrap();
    scheduler.start().unwrap();

    for size in 1..=5 {
        let specs = (0..size).map(|_| spec(true)).collect();
        let job = scheduler
            .submit_batch(&format!("batch-{}", size), Priority::Medium, specs)
            .unwrap();
        let snapshot = scheduler.wait_for_batch(job, WAIT).unwrap();

        assert_eq!(snapshot.status, TaskStatus::Completed, "size {}", size);
        assert_eq!(snapshot.progress, 1.0);
        assert_eq!(snapshot.tasks.len(), size);
    }
    scheduler.stop().unwrap();
}

/// Given a batch where one task fails terminally
/// When all tasks settle
/// Then the batch is Failed and progress counts only completed tasks.
#[test]
fn test_one_failure_fails_the_batch() {
    let scheduler = builder(2)
        .handler("generate-script", outcome_from_params)
        .build()
        .unwrap();
    scheduler.start().unwrap();

    let job = scheduler
        .submit_batch(
            "assets",
            Priority::High,
            vec![spec(true), spec(false), spec(true), spec(true)],
        )
        .unwrap();
    let snapshot = scheduler.wait_for_batch(job, WAIT).unwrap();
    scheduler.stop().unwrap();

    assert_eq!(snapshot.status, TaskStatus::Failed);
    assert_eq!(snapshot.progress, 0.75);
    assert_eq!(snapshot.name, "assets");
    assert_eq!(snapshot.tasks[1].status, TaskStatus::Failed);
}

/// Given a batch submitted while the pool is stopped
/// When it is inspected before and after starting
/// Then it moves from Pending to Completed, in creation order.
#[test]
fn test_batch_status_progression() {
    let scheduler = builder(1)
        .handler("generate-script", outcome_from_params)
        .build()
        .unwrap();

    let job = scheduler
        .submit_batch("level-1", Priority::Low, vec![spec(true), spec(true)])
        .unwrap();
    let pending = scheduler.get_batch(job).unwrap();
    assert_eq!(pending.status, TaskStatus::Pending);
    assert_eq!(pending.progress, 0.0);

    scheduler.start().unwrap();
    let done = scheduler.wait_for_batch(job, WAIT).unwrap();
    scheduler.stop().unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    let ids: Vec<_> = done.tasks.iter().map(|t| t.id).collect();
    let original: Vec<_> = pending.tasks.iter().map(|t| t.id).collect();
    assert_eq!(ids, original);
}

/// Given a gate that rejects one task of a batch
/// When the batch is submitted
/// Then the whole batch is rejected and nothing is enqueued.
#[test]
fn test_batch_is_all_or_nothing() {
    let scheduler = builder(1)
        .gate(|kind: &TaskKind, _: &Params| -> Result<GateVerdict, String> {
            match kind {
                TaskKind::Custom(name) if name == "deploy" => {
                    Err("deploy needs approval".to_string())
                }
                _ => Ok(GateVerdict::accept()),
            }
        })
        .build()
        .unwrap();

    let specs = vec![
        spec(true),
        TaskSpec::new(TaskKind::parse("deploy"), Params::new()),
    ];
    let err = scheduler
        .submit_batch("release", Priority::Critical, specs)
        .unwrap_err();

    assert!(matches!(err, Error::Rejected(_)));
    assert_eq!(scheduler.queued(), 0);
}

/// Given a batch file in JSON
/// When it is parsed and submitted
/// Then every entry becomes a task with its own params.
#[test]
fn test_batch_file_submission() {
    let file: BatchFile = serde_json::from_str(
        r#"{
            "name": "prefabs",
            "priority": "high",
            "tasks": [
                {"type": "generate-artifact", "params": {"name": "Crate"}},
                {"type": "generate-artifact", "spec": {"name": "Barrel"}}
            ]
        }"#,
    )
    .unwrap();

    let scheduler = builder(2)
        .handler("generate-artifact", |params: &Params| {
            let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
            HandlerOutcome::success(Some(format!("{}.prefab", name)))
        })
        .build()
        .unwrap();
    scheduler.start().unwrap();

    let priority = file.priority.unwrap_or_default();
    let job = scheduler.submit_batch(&file.name, priority, file.tasks).unwrap();
    let snapshot = scheduler.wait_for_batch(job, WAIT).unwrap();
    scheduler.stop().unwrap();

    assert_eq!(snapshot.priority, Priority::High);
    let outputs: Vec<_> = snapshot
        .tasks
        .iter()
        .map(|t| t.output.clone().unwrap())
        .collect();
    assert_eq!(outputs, vec!["Crate.prefab", "Barrel.prefab"]);
}

/// Given a store that retains one batch
/// When a second batch finishes after the first
/// Then the first batch is evicted and can no longer be queried.
#[test]
fn test_finished_batches_are_evicted_beyond_capacity() {
    let scheduler = builder(1)
        .handler("generate-script", outcome_from_params)
        .history_capacity(100, 1)
        .build()
        .unwrap();
    scheduler.start().unwrap();

    let first = scheduler
        .submit_batch("first", Priority::Low, vec![spec(true)])
        .unwrap();
    scheduler.wait_for_batch(first, WAIT).unwrap();
    let second = scheduler
        .submit_batch("second", Priority::Low, vec![spec(true)])
        .unwrap();
    scheduler.wait_for_batch(second, WAIT).unwrap();
    scheduler.stop().unwrap();

    assert!(scheduler.get_batch(first).is_none());
    assert!(scheduler.get_batch(second).is_some());
}

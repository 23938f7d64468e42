//! Retry policy tests: diagnosis, repair and the retry ceiling.

use std::sync::atomic::Ordering;
use std::time::Duration;

use lanework::core::{FailureClass, Params, Priority, Task, TaskKind, TaskStatus};
use lanework::orchestration::HandlerOutcome;
use lanework::repair::{ErrorKind, FailureContext};
use lanework::SchedulerEvent;
use tempfile::TempDir;

use crate::fixtures::{builder, events_for, params, FlakyHandler, WAIT};

/// Given a handler that fails with "Permission denied" twice, then succeeds
/// And a real file for fix_permissions to repair
/// When the task runs with a retry ceiling of 3
/// Then it completes after two fix_permissions repairs, both recorded before completion.
#[test]
fn test_permission_denied_twice_then_success() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("gen.sh");
    std::fs::write(&script, "#!/bin/sh\n").unwrap();

    let handler = FlakyHandler::new("bash: ./gen.sh: Permission denied", 2);
    let calls = handler.calls();
    let scheduler = builder(2).handler("generate-script", handler).build().unwrap();
    let events = scheduler.subscribe();
    scheduler.start().unwrap();

    let task = Task::new(
        TaskKind::GenerateScript,
        Priority::High,
        params("file_path", script.to_string_lossy()),
    )
    .with_max_retries(3);
    let id = scheduler.submit_task(task).unwrap();
    assert!(scheduler.wait_for(&[id], WAIT));
    scheduler.stop().unwrap();

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(task.output.as_deref(), Some("attempt-3"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let records = scheduler.repair_history_for(id);
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(record.strategy, "fix_permissions");
        assert_eq!(record.kind, ErrorKind::PermissionDenied);
        assert!(record.success);
        assert!(record.timestamp <= task.completed_at.unwrap());
    }

    let retries: Vec<_> = events_for(&events, id)
        .into_iter()
        .filter_map(|e| match e {
            SchedulerEvent::TaskRetrying { retry_count, .. } => Some(retry_count),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);
}

/// Given a handler failing with text no rule recognises
/// When the task runs
/// Then it fails after the first attempt with retry_count 1 and no repair.
#[test]
fn test_unclassified_error_fails_after_one_attempt() {
    let handler = FlakyHandler::new("xyzzy-unknown-error", usize::MAX);
    let calls = handler.calls();
    let scheduler = builder(1).handler("validate-target", handler).build().unwrap();
    scheduler.start().unwrap();

    let id = scheduler
        .submit(TaskKind::ValidateTarget, Priority::Medium, Params::new())
        .unwrap();
    assert!(scheduler.wait_for(&[id], WAIT));
    scheduler.stop().unwrap();

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure, Some(FailureClass::Unclassified));
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.error.as_deref(), Some("xyzzy-unknown-error"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(scheduler.repair_history().is_empty());
}

/// Given a retry ceiling of 0
/// When the task fails with a repairable error
/// Then it fails immediately, is never retried and nothing is repaired.
#[test]
fn test_ceiling_zero_is_never_retried() {
    let handler = FlakyHandler::new("Connection timeout", usize::MAX);
    let calls = handler.calls();
    let scheduler = builder(1).handler("generate-artifact", handler).build().unwrap();
    scheduler.start().unwrap();

    let task = Task::new(TaskKind::GenerateArtifact, Priority::Low, Params::new())
        .with_max_retries(0);
    let id = scheduler.submit_task(task).unwrap();
    assert!(scheduler.wait_for(&[id], WAIT));
    scheduler.stop().unwrap();

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure, Some(FailureClass::RetryBudgetExhausted));
    assert_eq!(task.retry_count, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(scheduler.repair_history().is_empty());
}

/// Given a handler that always fails with a repairable error
/// And a repair strategy that always succeeds
/// When the task runs with ceilings 1 through 4
/// Then the retry counter ends exactly at the ceiling and never above it.
#[test]
fn test_retry_counter_never_exceeds_ceiling() {
    for ceiling in 1..=4u32 {
        let handler = FlakyHandler::new("MemoryError", usize::MAX);
        let calls = handler.calls();
        let scheduler = builder(2)
            .handler("optimize-resource", handler)
            .repair_strategy("optimize_memory_usage", |_: &mut FailureContext| {
                Ok::<bool, lanework::Error>(true)
            })
            .build()
            .unwrap();
        let events = scheduler.subscribe();
        scheduler.start().unwrap();

        let task = Task::new(TaskKind::OptimizeResource, Priority::High, Params::new())
            .with_max_retries(ceiling);
        let id = scheduler.submit_task(task).unwrap();
        assert!(scheduler.wait_for(&[id], WAIT));
        scheduler.stop().unwrap();

        let task = scheduler.get_task(id).unwrap();
        assert_eq!(task.failure, Some(FailureClass::RetryBudgetExhausted));
        assert_eq!(task.retry_count, ceiling);
        assert_eq!(calls.load(Ordering::SeqCst), ceiling as usize + 1);
        assert_eq!(scheduler.repair_history_for(id).len(), ceiling as usize);

        for event in events_for(&events, id) {
            if let SchedulerEvent::TaskRetrying { retry_count, .. } = event {
                assert!(retry_count <= ceiling);
            }
        }
    }
}

/// Given a diagnosed failure whose repair cannot succeed
/// When the task runs
/// Then it fails with RepairFailed and the failed attempt is in the trail.
#[test]
fn test_failed_repair_is_terminal() {
    let handler = FlakyHandler::new("FileNotFoundError: scene.unity", usize::MAX);
    let scheduler = builder(1).handler("generate-artifact", handler).build().unwrap();
    scheduler.start().unwrap();

    // No missing_path detail: create_missing_file has nothing to create.
    let id = scheduler
        .submit(TaskKind::GenerateArtifact, Priority::Medium, Params::new())
        .unwrap();
    assert!(scheduler.wait_for(&[id], WAIT));
    scheduler.stop().unwrap();

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.failure, Some(FailureClass::RepairFailed));
    assert_eq!(task.retry_count, 1);
    let records = scheduler.repair_history_for(id);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].strategy, "create_missing_file");
    assert!(!records[0].success);
}

/// Given a handler that attaches the missing path as failure detail
/// When create_missing_file repairs it
/// Then the retried attempt finds the file and succeeds.
#[test]
fn test_missing_file_detail_drives_repair() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("assets").join("level.json");
    let handler_target = target.clone();

    let scheduler = builder(1)
        .handler("validate-target", move |_: &Params| {
            if handler_target.exists() {
                HandlerOutcome::success(Some(handler_target.display().to_string()))
            } else {
                HandlerOutcome::failure("No such file or directory")
                    .with_detail("missing_path", handler_target.display().to_string())
                    .with_detail("default_content", "{}")
            }
        })
        .build()
        .unwrap();
    scheduler.start().unwrap();

    let id = scheduler
        .submit(TaskKind::ValidateTarget, Priority::Critical, Params::new())
        .unwrap();
    assert!(scheduler.wait_for(&[id], WAIT));
    scheduler.stop().unwrap();

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retry_count, 1);
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "{}");
}

/// Given memory pressure on a task with a batch_size param
/// When optimize_memory_usage repairs it
/// Then the retry runs with the reduced batch size.
#[test]
fn test_repair_adjusts_params_for_retry() {
    let scheduler = builder(1)
        .handler("optimize-resource", |params: &Params| {
            let size = params.get("batch_size").and_then(|v| v.as_u64()).unwrap_or(0);
            if size > 16 {
                HandlerOutcome::failure("MemoryError: cannot allocate")
            } else {
                HandlerOutcome::success(Some(size.to_string()))
            }
        })
        .build()
        .unwrap();
    scheduler.start().unwrap();

    let id = scheduler
        .submit(
            TaskKind::OptimizeResource,
            Priority::Medium,
            params("batch_size", 64),
        )
        .unwrap();
    assert!(scheduler.wait_for(&[id], WAIT));
    scheduler.stop().unwrap();

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.output.as_deref(), Some("16"));
    assert_eq!(task.retry_count, 2);
}

/// Given a transient network failure and a short configured backoff
/// When the task runs
/// Then retry_with_backoff waits and the retry succeeds.
#[test]
fn test_transient_failure_retries_with_backoff() {
    let mut config = lanework::config::Config::default();
    config.workers = 1;
    config.poll_interval_ms = 5;
    config.repair.backoff_base_ms = 5;
    config.repair.backoff_max_ms = 20;

    let handler = FlakyHandler::new("TimeoutError: upstream", 1);
    let scheduler = lanework::SchedulerBuilder::from_config(&config)
        .handler("generate-artifact", handler)
        .build()
        .unwrap();
    scheduler.start().unwrap();

    let id = scheduler
        .submit(TaskKind::GenerateArtifact, Priority::Low, Params::new())
        .unwrap();
    assert!(scheduler.wait_for(&[id], WAIT));
    scheduler.stop().unwrap();

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    let records = scheduler.repair_history_for(id);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].strategy, "retry_with_backoff");
    assert!(records[0].success);
}

/// Given an external script without execute permission
/// When a CommandHandler runs it and the failure is diagnosed
/// Then fix_permissions makes it executable and the retry succeeds.
#[cfg(unix)]
#[test]
fn test_command_handler_permission_repair() {
    use lanework::config::Config;
    use lanework::orchestration::CommandSpec;
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let script = dir.path().join("build.sh");
    std::fs::write(&script, "#!/bin/sh\necho built\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644)).unwrap();

    let mut config = Config::default();
    config.workers = 1;
    config.poll_interval_ms = 5;
    config.handlers.insert(
        "build".to_string(),
        CommandSpec {
            program: script.display().to_string(),
            args: Vec::new(),
            timeout_secs: None,
        },
    );
    let scheduler = lanework::Scheduler::from_config(&config).unwrap();
    scheduler.start().unwrap();

    let id = scheduler
        .submit(
            TaskKind::parse("build"),
            Priority::High,
            params("file_path", script.display().to_string()),
        )
        .unwrap();
    assert!(scheduler.wait_for(&[id], WAIT));
    scheduler.stop().unwrap();

    let task = scheduler.get_task(id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed, "error: {:?}", task.error);
    assert_eq!(task.output.as_deref(), Some("built"));
    let mode = std::fs::metadata(&script).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o755);
    assert_eq!(scheduler.repair_history_for(id).len(), 1);
}

/// Given a repair that takes a while on one worker
/// When other tasks are queued
/// Then the second worker keeps draining the lanes meanwhile.
#[test]
fn test_repair_does_not_block_other_workers() {
    let scheduler = builder(2)
        .handler("generate-artifact", FlakyHandler::new("Disk full", 1))
        .handler("validate-target", |_: &Params| HandlerOutcome::success(None))
        .repair_strategy("cleanup_disk_space", |_: &mut FailureContext| {
            std::thread::sleep(Duration::from_millis(200));
            Ok::<bool, lanework::Error>(true)
        })
        .build()
        .unwrap();
    scheduler.start().unwrap();

    let slow = scheduler
        .submit(TaskKind::GenerateArtifact, Priority::Critical, Params::new())
        .unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let quick: Vec<_> = (0..5)
        .map(|_| {
            scheduler
                .submit(TaskKind::ValidateTarget, Priority::Low, Params::new())
                .unwrap()
        })
        .collect();

    let mut all = quick.clone();
    all.push(slow);
    assert!(scheduler.wait_for(&all, WAIT));
    scheduler.stop().unwrap();

    let slow = scheduler.get_task(slow).unwrap();
    assert_eq!(slow.status, TaskStatus::Completed);
    for id in quick {
        let quick = scheduler.get_task(id).unwrap();
        assert!(quick.completed_at.unwrap() < slow.completed_at.unwrap());
    }
}

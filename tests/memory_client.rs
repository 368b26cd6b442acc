//! End-to-end runs against the in-memory lock service.
//!
//! These exercise the real client contract: contended acquisition, ttl
//! expiry, and the extension heartbeat keeping a lock held well past its
//! original ttl while a task runs.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use belay::{
    LockClient, LockClientOptions, LockError, MemoryLockClient, RunError, RunOptions, Runner,
    RunnerConfig,
};

#[tokio::test(start_paused = true)]
async fn heartbeat_keeps_the_lock_held_past_its_original_ttl() {
    let client = Arc::new(MemoryLockClient::new());
    let runner = Runner::new(Arc::clone(&client) as Arc<dyn LockClient>, RunnerConfig::default());

    let probe = Arc::clone(&client);
    let value = runner
        .run(
            RunOptions::new("jobs").with_lock_ttl(Duration::from_millis(300)),
            move |_cancel| async move {
                // Well past the original 300ms ttl; extensions keep it held.
                tokio::time::sleep(Duration::from_millis(1000)).await;
                assert!(probe.is_held("jobs"));
                anyhow::Ok(5)
            },
        )
        .await
        .expect("run succeeds");

    assert_eq!(value, 5);
    assert!(!client.is_held("jobs"));
}

#[tokio::test(start_paused = true)]
async fn a_second_run_cannot_enter_while_the_lock_is_held() {
    let client = Arc::new(MemoryLockClient::with_options(LockClientOptions {
        retry_count: 2,
        retry_delay: Duration::from_millis(20),
    }));
    let runner = Runner::new(Arc::clone(&client) as Arc<dyn LockClient>, RunnerConfig::default());

    let (first, second) = tokio::join!(
        runner.run(
            RunOptions::new("jobs").with_lock_ttl(Duration::from_millis(300)),
            |_cancel| async {
                tokio::time::sleep(Duration::from_millis(400)).await;
                anyhow::Ok("first")
            },
        ),
        async {
            // Arrive while the first run holds the key; both retries land
            // inside its critical section.
            tokio::time::sleep(Duration::from_millis(10)).await;
            runner
                .run(
                    RunOptions::new("jobs").with_lock_ttl(Duration::from_millis(300)),
                    |_cancel| async { anyhow::Ok("second") },
                )
                .await
        },
    );

    assert_eq!(first.expect("first run"), "first");
    assert!(matches!(
        second,
        Err(RunError::Lock(LockError::RetriesExhausted { attempts: 2, .. }))
    ));

    // The key frees once the first run releases it.
    let third = runner
        .run(RunOptions::new("jobs"), |_cancel| async {
            anyhow::Ok("third")
        })
        .await
        .expect("third run");
    assert_eq!(third, "third");
}

#[tokio::test(start_paused = true)]
async fn runs_under_distinct_keys_are_independent() {
    let client = Arc::new(MemoryLockClient::new());
    let runner = Runner::new(Arc::clone(&client) as Arc<dyn LockClient>, RunnerConfig::default());

    let (left, right) = tokio::join!(
        runner.run(RunOptions::new("left"), |_cancel| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            anyhow::Ok("left done")
        }),
        runner.run(RunOptions::new("right"), |_cancel| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            anyhow::Ok("right done")
        }),
    );

    assert_eq!(left.expect("left run"), "left done");
    assert_eq!(right.expect("right run"), "right done");
    assert!(!client.is_held("left"));
    assert!(!client.is_held("right"));
}

#[tokio::test(start_paused = true)]
async fn a_failing_task_still_releases_the_lock() {
    let client = Arc::new(MemoryLockClient::new());
    let runner = Runner::new(Arc::clone(&client) as Arc<dyn LockClient>, RunnerConfig::default());

    let outcome = runner
        .run::<_, _, (), anyhow::Error>(RunOptions::new("jobs"), |_cancel| async {
            Err(anyhow!("task exploded"))
        })
        .await;

    match outcome {
        Err(RunError::Task(error)) => assert_eq!(error.to_string(), "task exploded"),
        other => panic!("expected the task's own error, got {other:?}"),
    }
    assert!(!client.is_held("jobs"));
}

#[tokio::test(start_paused = true)]
async fn multi_key_runs_hold_every_key_for_the_critical_section() {
    let client = Arc::new(MemoryLockClient::new());
    let runner = Runner::new(Arc::clone(&client) as Arc<dyn LockClient>, RunnerConfig::default());

    let probe = Arc::clone(&client);
    runner
        .run(
            RunOptions::new(vec!["a", "b", "c"]),
            move |_cancel| async move {
                let mut held = probe.held_keys();
                held.sort();
                assert_eq!(held, vec!["a", "b", "c"]);
                anyhow::Ok(())
            },
        )
        .await
        .expect("run succeeds");

    assert!(client.held_keys().is_empty());
}

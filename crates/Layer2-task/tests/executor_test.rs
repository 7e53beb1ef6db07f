//! Executor 통합 테스트 - 터미널 결과가 정확히 한 번 나오는지 검증
//!
//! `cargo test -p cmsync-task --test executor_test`

use cmsync_foundation::Error;
use cmsync_task::{AsyncTaskExecutor, ExecutorConfig, Task, TaskOutcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_mixed_outcomes_resolve_once_each() {
    let executor = AsyncTaskExecutor::new(
        ExecutorConfig::default()
            .with_max_workers(4)
            .with_queue_capacity(32)
            .with_default_timeout(Duration::from_millis(100)),
    );
    let finished = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..12u64 {
        let finished = Arc::clone(&finished);
        let handle = executor
            .submit(Task::new(format!("cmh-{}", i), "mixed"), move |_| async move {
                let result = match i % 3 {
                    0 => Ok(i),
                    1 => Err(Error::Internal(format!("failure {}", i))),
                    _ => {
                        tokio::time::sleep(Duration::from_millis(250)).await;
                        Ok(i)
                    }
                };
                finished.fetch_add(1, Ordering::SeqCst);
                result
            })
            .expect("submit");
        handles.push((i, handle));
    }

    for (i, handle) in handles {
        let outcome = handle.await;
        match i % 3 {
            0 => assert_eq!(outcome, TaskOutcome::Completed(i)),
            1 => assert!(outcome.error().unwrap().contains(&format!("failure {}", i))),
            _ => assert!(outcome.is_timed_out()),
        }
    }

    // Late work keeps running to completion but never changes an outcome
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 12);

    let stats = executor.stats();
    assert_eq!(stats.submitted, 12);
    assert_eq!(stats.completed + stats.failed + stats.timed_out, 12);
    assert_eq!(stats.timed_out, 4);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn test_dropped_handle_does_not_block_worker() {
    let executor = AsyncTaskExecutor::new(
        ExecutorConfig::default()
            .with_max_workers(1)
            .with_queue_capacity(0),
    );

    let first = executor
        .submit(Task::new("cmh-1", "ignored"), |_| async { Ok(()) })
        .expect("submit");
    drop(first);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = executor
        .submit(Task::new("cmh-2", "after"), |_| async { Ok("done") })
        .expect("worker should be free again");
    assert_eq!(second.await, TaskOutcome::Completed("done"));
}

//! End-to-end tests for the dispatch engine
//!
//! Everything runs against the in-memory store with short poll intervals so
//! the dual delivery path (fast handoff + store poll) is exercised for real.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use conveyor::persistence::InMemoryTaskStore;
use conveyor::prelude::*;
use conveyor::reliability::RetryPolicy;

fn fast_config() -> DispatcherConfig {
    DispatcherConfig::new()
        .with_workers_per_priority(1)
        .with_queue_capacity(16)
        .with_poll_interval(Duration::from_millis(25))
        .with_task_timeout(Duration::from_secs(2))
        .with_retry_policy(RetryPolicy::fixed(Duration::from_millis(50)))
        .with_shutdown_timeout(Duration::from_secs(5))
}

fn engine(config: DispatcherConfig) -> (Arc<InMemoryTaskStore>, Dispatcher) {
    // Opt-in logging for debugging: RUST_LOG=conveyor=debug cargo test
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let store = Arc::new(InMemoryTaskStore::new());
    let dispatcher = Dispatcher::new(Arc::clone(&store) as Arc<dyn TaskStore>, config);
    (store, dispatcher)
}

/// Poll the store until the task reaches the wanted status.
async fn wait_for_status(store: &InMemoryTaskStore, id: &str, status: TaskStatus) -> Task {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(task) = store.get_task(id).await {
            if task.status == status {
                return task;
            }
        }
        assert!(
            Instant::now() < deadline,
            "task {id} did not reach {status} in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_simple_success() {
    let (store, dispatcher) = engine(fast_config());

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    dispatcher.register_handler("greet", move |_ctx, _task| {
        let seen = Arc::clone(&seen);
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(())
        }
    });

    dispatcher.start().await.unwrap();

    let task = Task::new("greet", Priority::High, serde_json::json!({"k": "v"}));
    let id = dispatcher.submit(task).await.unwrap();

    let done = wait_for_status(&store, &id, TaskStatus::Completed).await;
    assert_eq!(done.retry_count, 0);
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let metrics = dispatcher.metrics();
    assert_eq!(metrics.submitted_total("greet", Priority::High), 1);
    assert_eq!(metrics.processed_total("greet", TaskOutcome::Completed), 1);
    assert_eq!(metrics.queue_size(Priority::High), 0);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_success_after_one_failure() {
    let (store, dispatcher) = engine(fast_config());

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    dispatcher.register_handler("flaky", move |_ctx, _task| {
        let seen = Arc::clone(&seen);
        async move {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(HandlerError::retryable("first attempt fails"))
            } else {
                Ok(())
            }
        }
    });

    dispatcher.start().await.unwrap();
    let id = dispatcher
        .submit(Task::new("flaky", Priority::Medium, serde_json::json!({})))
        .await
        .unwrap();

    let done = wait_for_status(&store, &id, TaskStatus::Completed).await;
    assert_eq!(done.retry_count, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(dispatcher.metrics().retries_total("flaky"), 1);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_permanent_failure_after_exhausted_retries() {
    let (store, dispatcher) = engine(fast_config());

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    dispatcher.register_handler("doomed", move |_ctx, _task| {
        let seen = Arc::clone(&seen);
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::retryable("boom"))
        }
    });

    dispatcher.start().await.unwrap();
    let task = Task::new("doomed", Priority::High, serde_json::json!({})).with_max_retries(2);
    let id = dispatcher.submit(task).await.unwrap();

    let done = wait_for_status(&store, &id, TaskStatus::Failed).await;
    assert_eq!(done.retry_count, 2);
    assert_eq!(done.error.as_deref(), Some("boom"));
    // attempts = 1 initial + 2 retries
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        dispatcher.metrics().processed_total("doomed", TaskOutcome::Failed),
        1
    );

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_critical_not_starved_by_low_backlog() {
    let (store, dispatcher) = engine(fast_config());

    let order = Arc::new(Mutex::new(Vec::new()));
    let completions = Arc::clone(&order);
    dispatcher.register_handler("work", move |_ctx, task| {
        let completions = Arc::clone(&completions);
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            completions.lock().push(task.priority);
            Ok(())
        }
    });

    dispatcher.start().await.unwrap();

    let mut low_ids = vec![];
    for _ in 0..6 {
        low_ids.push(
            dispatcher
                .submit(Task::new("work", Priority::Low, serde_json::json!({})))
                .await
                .unwrap(),
        );
    }
    let critical_id = dispatcher
        .submit(Task::new("work", Priority::Critical, serde_json::json!({})))
        .await
        .unwrap();

    wait_for_status(&store, &critical_id, TaskStatus::Completed).await;
    for id in &low_ids {
        wait_for_status(&store, id, TaskStatus::Completed).await;
    }

    // The critical task rode its dedicated worker past the low backlog: it
    // cannot have been among the last completions.
    let order = order.lock();
    let critical_pos = order
        .iter()
        .position(|p| *p == Priority::Critical)
        .expect("critical task completed");
    assert!(
        critical_pos < 3,
        "critical task finished at position {critical_pos} of {}",
        order.len()
    );

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_handler_fails_immediately() {
    let (store, dispatcher) = engine(fast_config());
    dispatcher.start().await.unwrap();

    let id = dispatcher
        .submit(Task::new("unknown", Priority::Low, serde_json::json!({})))
        .await
        .unwrap();

    let done = wait_for_status(&store, &id, TaskStatus::Failed).await;
    assert_eq!(done.retry_count, 0);
    assert!(done.error.as_deref().unwrap().contains("unknown"));
    assert_eq!(dispatcher.metrics().retries_total("unknown"), 0);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_preseeded_task_recovered_via_poll() {
    let (store, dispatcher) = engine(fast_config());
    dispatcher.register_handler("recover", |_ctx, _task| async { Ok(()) });

    // Seeded behind the dispatcher's back: no submit, no fast-path enqueue.
    let task = Task::new("recover", Priority::Medium, serde_json::json!({}));
    let id = task.id.clone();
    store.save_task(&task).await.unwrap();

    dispatcher.start().await.unwrap();
    wait_for_status(&store, &id, TaskStatus::Completed).await;

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_queue_overflow_recovers_via_poller() {
    let config = fast_config().with_queue_capacity(1);
    let (store, dispatcher) = engine(config);
    dispatcher.register_handler("bulk", |_ctx, _task| async { Ok(()) });

    // Submitted before start: the fast path can buffer one task per
    // priority, the rest are dropped and must come back through the poll.
    let mut ids = vec![];
    for _ in 0..5 {
        ids.push(
            dispatcher
                .submit(Task::new("bulk", Priority::High, serde_json::json!({})))
                .await
                .unwrap(),
        );
    }

    dispatcher.start().await.unwrap();
    for id in &ids {
        wait_for_status(&store, id, TaskStatus::Completed).await;
    }

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_inflight_handler() {
    let (store, dispatcher) = engine(fast_config());
    dispatcher.register_handler("slow", |_ctx, _task| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(())
    });

    dispatcher.start().await.unwrap();
    let id = dispatcher
        .submit(Task::new("slow", Priority::High, serde_json::json!({})))
        .await
        .unwrap();

    wait_for_status(&store, &id, TaskStatus::Processing).await;
    dispatcher.shutdown().await.unwrap();

    // The drain persisted the handler's result before the worker exited.
    let done = store.get_task(&id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_stale_processing_task_is_reclaimed() {
    let config = fast_config().with_stale_reclaim(Duration::from_millis(50), Duration::from_millis(200));
    let (store, dispatcher) = engine(config);
    dispatcher.register_handler("orphan", |_ctx, _task| async { Ok(()) });

    // A worker process died mid-handler an hour ago.
    let mut task = Task::new("orphan", Priority::High, serde_json::json!({}));
    task.mark_started("worker-from-dead-process");
    task.started_at = Some(chrono::Utc::now() - chrono::Duration::hours(1));
    let id = task.id.clone();
    store.save_task(&task).await.unwrap();

    dispatcher.start().await.unwrap();
    let done = wait_for_status(&store, &id, TaskStatus::Completed).await;
    assert_ne!(done.worker_id.as_deref(), Some("worker-from-dead-process"));

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_handler_replacement_affects_subsequent_invocations() {
    let (store, dispatcher) = engine(fast_config());

    let old_handler_ran = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&old_handler_ran);
    dispatcher.register_handler("versioned", move |_ctx, _task| {
        let flag = Arc::clone(&flag);
        async move {
            flag.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::retryable("old version"))
        }
    });
    dispatcher.register_handler("versioned", |_ctx, _task| async { Ok(()) });

    dispatcher.start().await.unwrap();
    let id = dispatcher
        .submit(Task::new("versioned", Priority::Low, serde_json::json!({})))
        .await
        .unwrap();

    let done = wait_for_status(&store, &id, TaskStatus::Completed).await;
    assert_eq!(done.retry_count, 0);
    assert_eq!(old_handler_ran.load(Ordering::SeqCst), 0);

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retry_waits_for_backoff() {
    let config = fast_config().with_retry_policy(RetryPolicy::fixed(Duration::from_millis(300)));
    let (store, dispatcher) = engine(config);

    let attempts = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&attempts);
    dispatcher.register_handler("backoff", move |_ctx, _task| {
        let log = Arc::clone(&log);
        async move {
            let first = {
                let mut log = log.lock();
                log.push(Instant::now());
                log.len() == 1
            };
            if first {
                Err(HandlerError::retryable("try again"))
            } else {
                Ok(())
            }
        }
    });

    dispatcher.start().await.unwrap();
    let id = dispatcher
        .submit(Task::new("backoff", Priority::High, serde_json::json!({})))
        .await
        .unwrap();

    wait_for_status(&store, &id, TaskStatus::Completed).await;

    let attempts = attempts.lock();
    assert_eq!(attempts.len(), 2);
    let gap = attempts[1].duration_since(attempts[0]);
    assert!(gap >= Duration::from_millis(300), "retry fired after {gap:?}");

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_every_submission_reaches_one_terminal_state() {
    let (store, dispatcher) = engine(fast_config().with_workers_per_priority(2));

    dispatcher.register_handler("mixed", |_ctx, task| async move {
        if task.payload["fail"].as_bool().unwrap_or(false) {
            Err(HandlerError::retryable("planned failure"))
        } else {
            Ok(())
        }
    });

    dispatcher.start().await.unwrap();

    let mut ids = vec![];
    for i in 0..20 {
        let task = Task::new(
            "mixed",
            Priority::ALL[i % 4],
            serde_json::json!({"fail": i % 5 == 0}),
        )
        .with_max_retries(1);
        ids.push(dispatcher.submit(task).await.unwrap());
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let stats = dispatcher.stats().await.unwrap();
        if stats.completed + stats.failed == ids.len() {
            break;
        }
        assert!(Instant::now() < deadline, "workload did not drain: {stats:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for id in &ids {
        let task = store.get_task(id).await.unwrap();
        assert!(task.status.is_terminal());
        assert!(task.retry_count <= task.max_retries);
        assert!(task.completed_at.is_some());
        if task.status == TaskStatus::Failed {
            assert!(task.error.is_some());
        }
    }

    dispatcher.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_workers_active_gauge_tracks_pool() {
    let (_store, dispatcher) = engine(fast_config().with_workers_per_priority(2));

    dispatcher.start().await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while dispatcher.metrics().workers_active() < 8 {
        assert!(Instant::now() < deadline, "workers never came up");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    dispatcher.shutdown().await.unwrap();
    assert_eq!(dispatcher.metrics().workers_active(), 0);
}

#[tokio::test]
async fn test_restart_after_shutdown() {
    let (store, dispatcher) = engine(fast_config());
    dispatcher.register_handler("again", |_ctx, _task| async { Ok(()) });

    dispatcher.start().await.unwrap();
    dispatcher.shutdown().await.unwrap();

    // Work submitted while stopped is only persisted; a fresh start must
    // pick it up through the poll path.
    let id = dispatcher
        .submit(Task::new("again", Priority::Medium, serde_json::json!({})))
        .await
        .unwrap();

    dispatcher.start().await.unwrap();
    wait_for_status(&store, &id, TaskStatus::Completed).await;
    dispatcher.shutdown().await.unwrap();
}

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use letterbox::jobs::{
    enqueue, enqueue_with, Job, JobOpts, JobRegistry, JobResult, JobStatus, MemoryQueue,
    QueueProvider, Worker,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

#[derive(Clone, Default)]
struct TestState {
    runs: Arc<AtomicUsize>,
}

#[derive(Serialize, Deserialize)]
struct CountJob {
    fail: bool,
}

#[async_trait::async_trait]
impl Job for CountJob {
    const JOB_TYPE: &'static str = "count";
    type Context = TestState;

    async fn perform(self, ctx: &TestState) -> JobResult {
        let run = ctx.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err("boom".into());
        }
        Ok(Some(json!({ "run": run })))
    }
}

#[tokio::test]
async fn memory_queue_claims_in_order() {
    let queue = MemoryQueue::new();
    let first = enqueue(&queue, CountJob { fail: false }).await.unwrap();
    enqueue(&queue, CountJob { fail: false }).await.unwrap();

    let claimed = queue.claim_next("w1", &[]).await.unwrap().unwrap();
    assert_eq!(claimed.id, first);
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.attempts, 1);
    assert_eq!(claimed.locked_by.as_deref(), Some("w1"));
    assert_eq!(claimed.queue, "default");
}

#[tokio::test]
async fn memory_queue_empty_returns_none() {
    let queue = MemoryQueue::new();
    assert!(queue.claim_next("w1", &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn claims_respect_queue_and_schedule() {
    let queue = MemoryQueue::new();
    enqueue_with(&queue, CountJob { fail: false }, JobOpts::default().queue("mailers"))
        .await
        .unwrap();
    enqueue_with(
        &queue,
        CountJob { fail: false },
        JobOpts::default().delay(Duration::from_secs(60)),
    )
    .await
    .unwrap();

    let other = vec!["reports".to_string()];
    assert!(queue.claim_next("w1", &other).await.unwrap().is_none());

    let mailers = vec!["mailers".to_string()];
    let claimed = queue.claim_next("w1", &mailers).await.unwrap().unwrap();
    assert_eq!(claimed.queue, "mailers");

    // The delayed job on the default queue is not due yet.
    assert!(queue.claim_next("w1", &[]).await.unwrap().is_none());
}

#[tokio::test]
async fn delay_wins_over_run_at() {
    let queue = MemoryQueue::new();
    let at = OffsetDateTime::now_utc() + Duration::from_secs(3600);

    let scheduled = enqueue_with(&queue, CountJob { fail: false }, JobOpts::default().run_at(at))
        .await
        .unwrap();
    let delayed = enqueue_with(
        &queue,
        CountJob { fail: false },
        JobOpts::default().run_at(at).delay(Duration::from_secs(5)),
    )
    .await
    .unwrap();

    assert_eq!(queue.get(scheduled).await.unwrap().run_at, at);
    assert!(queue.get(delayed).await.unwrap().run_at < at);
}

#[tokio::test]
async fn work_off_completes_and_retries() {
    let queue = MemoryQueue::new();
    let ok = enqueue(&queue, CountJob { fail: false }).await.unwrap();
    let bad = enqueue_with(
        &queue,
        CountJob { fail: true },
        JobOpts {
            max_attempts: 1,
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let state = TestState::default();
    let registry = JobRegistry::new().register::<CountJob>();
    let worker = Worker::new(queue.clone(), registry, state.clone());
    assert_eq!(worker.work_off().await.unwrap(), 2);
    assert_eq!(state.runs.load(Ordering::SeqCst), 2);

    let ok = queue.get(ok).await.unwrap();
    assert_eq!(ok.status, JobStatus::Completed);
    assert_eq!(ok.result, Some(json!({ "run": 1 })));
    assert!(ok.completed_at.is_some());

    let bad = queue.get(bad).await.unwrap();
    assert_eq!(bad.status, JobStatus::Failed);
    assert_eq!(bad.last_error.as_deref(), Some("boom"));
    assert!(queue.pending().await.is_empty());
}

#[tokio::test]
async fn unknown_and_expired_jobs() {
    let queue = MemoryQueue::new();
    let unknown = enqueue(&queue, CountJob { fail: false }).await.unwrap();
    let expired = enqueue_with(
        &queue,
        CountJob { fail: false },
        JobOpts {
            expires_in: Some(Duration::ZERO),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let registry: JobRegistry<TestState> = JobRegistry::new();
    assert!(!registry.contains("count"));
    let worker = Worker::new(queue.clone(), registry, TestState::default());
    assert_eq!(worker.work_off().await.unwrap(), 2);

    assert_eq!(queue.get(unknown).await.unwrap().status, JobStatus::Failed);
    assert_eq!(queue.get(expired).await.unwrap().status, JobStatus::Expired);
}

#[test]
fn registry_lists_job_types() {
    let registry = JobRegistry::<TestState>::new().register::<CountJob>();
    assert!(registry.contains("count"));
    assert_eq!(registry.job_types(), vec!["count"]);
}

#[test]
fn status_round_trips_through_text() {
    for status in [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Expired,
    ] {
        assert_eq!(JobStatus::try_from(status.to_string()), Ok(status));
    }
    assert!(JobStatus::try_from("paused".to_string()).is_err());
}

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::entry::JobEntry;
use super::registry::JobRegistry;
use super::traits::QueueProvider;
use super::JobError;

/// Claims entries from a [`QueueProvider`] and runs them through a
/// [`JobRegistry`], then stores the outcome: completed, retried with backoff,
/// failed or expired.
///
/// ```ignore
/// let registry = JobRegistry::new()
///     .register::<MailDeliveryJob<AppState>>()
///     .register::<PurgeBounces>();
///
/// Worker::new(queue, registry, app_state)
///     .queues(["mailers", "default"])
///     .concurrency(8)
///     .poll_interval(Duration::from_millis(500))
///     .start();
/// ```
pub struct Worker<Q: QueueProvider, S: Send + Sync + 'static> {
    queue: Q,
    registry: Arc<JobRegistry<S>>,
    ctx: Arc<S>,
    queues: Vec<String>,
    concurrency: usize,
    poll_interval: Duration,
    id: String,
}

impl<Q: QueueProvider, S: Send + Sync + 'static> Worker<Q, S> {
    pub fn new(queue: Q, registry: JobRegistry<S>, ctx: S) -> Self {
        Self {
            queue,
            registry: Arc::new(registry),
            ctx: Arc::new(ctx),
            queues: Vec::new(),
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
            id: format!("worker-{}", uuid::Uuid::new_v4()),
        }
    }

    /// Listen on these queues only. Default: every queue.
    pub fn queues<I, T>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    /// Jobs run in parallel by [`start`](Self::start). Default: 4.
    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    /// Base wait between polls of an empty queue. Default: 1s.
    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.poll_interval = d;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Claim and run one due entry. `false` when nothing was due.
    pub async fn run_once(&self) -> Result<bool, JobError> {
        let Some(entry) = self.queue.claim_next(&self.id, &self.queues).await? else {
            return Ok(false);
        };
        execute(&self.queue, &self.registry, self.ctx.clone(), entry).await;
        Ok(true)
    }

    /// Run due entries one after another until none is left, returning how
    /// many ran. Retries scheduled meanwhile wait for a later call.
    pub async fn work_off(&self) -> Result<usize, JobError> {
        let mut ran = 0;
        while self.run_once().await? {
            ran += 1;
        }
        Ok(ran)
    }

    /// Poll in a background task until the runtime shuts down.
    pub fn start(self) -> JoinHandle<()> {
        let Worker {
            queue,
            registry,
            ctx,
            queues,
            concurrency,
            poll_interval,
            id,
        } = self;

        tracing::info!(
            worker_id = %id,
            ?queues,
            job_types = ?registry.job_types(),
            concurrency,
            "worker running"
        );

        tokio::spawn(async move {
            let slots = Arc::new(Semaphore::new(concurrency));
            let mut idle_polls = 0_u32;

            loop {
                let Ok(slot) = slots.clone().acquire_owned().await else {
                    break;
                };

                match queue.claim_next(&id, &queues).await {
                    Ok(Some(entry)) => {
                        idle_polls = 0;
                        let queue = queue.clone();
                        let registry = registry.clone();
                        let ctx = ctx.clone();
                        tokio::spawn(async move {
                            execute(&queue, &registry, ctx, entry).await;
                            drop(slot);
                        });
                    }
                    Ok(None) => {
                        drop(slot);
                        idle_polls = idle_polls.saturating_add(1);
                        tokio::time::sleep(idle_wait(poll_interval, idle_polls)).await;
                    }
                    Err(e) => {
                        drop(slot);
                        tracing::error!(worker_id = %id, error = %e, "claiming from queue failed");
                        tokio::time::sleep(poll_interval).await;
                    }
                }
            }
        })
    }
}

/// Idle polls stretch the interval by a tenth each, up to one and a half.
fn idle_wait(base: Duration, idle_polls: u32) -> Duration {
    base.mul_f64((1.0 + f64::from(idle_polls) * 0.1).min(1.5))
}

async fn execute<Q: QueueProvider, S: Send + Sync + 'static>(
    queue: &Q,
    registry: &JobRegistry<S>,
    ctx: Arc<S>,
    mut entry: JobEntry,
) {
    let span = tracing::info_span!(
        "job",
        job_id = %entry.id,
        job_type = %entry.job_type,
        queue = %entry.queue,
        attempt = entry.attempts,
    );

    async {
        if entry.has_expired(OffsetDateTime::now_utc()) {
            tracing::info!("job expired before it ran");
            entry.expire(OffsetDateTime::now_utc());
            return;
        }

        let outcome = registry
            .run(&entry.job_type, entry.payload.clone(), ctx)
            .await;
        let now = OffsetDateTime::now_utc();
        match outcome {
            None => {
                tracing::error!("no job registered for this type");
                entry.give_up("unknown job type", now);
            }
            Some(Ok(result)) => {
                tracing::info!("job completed");
                entry.complete(result, now);
            }
            Some(Err(e)) => {
                let error = e.to_string();
                if e.downcast_ref::<JobError>().is_some_and(JobError::is_permanent) {
                    tracing::error!(%error, "job failed, not retryable");
                    entry.give_up(error, now);
                    return;
                }
                match entry.fail(error.clone(), now) {
                    Some(retry_in) => tracing::warn!(
                        %error,
                        retry_in_secs = retry_in.as_secs(),
                        "job failed, retry scheduled"
                    ),
                    None => tracing::error!(%error, "job failed permanently"),
                }
            }
        }
    }
    .instrument(span)
    .await;

    if let Err(e) = queue.update(&entry).await {
        tracing::error!(job_id = %entry.id, error = %e, "storing job state failed");
    }
}

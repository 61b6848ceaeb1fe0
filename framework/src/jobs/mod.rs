//! Background jobs: named queues, delayed runs, retries with backoff and
//! expiry over a pluggable store.
//!
//! A [`Job`] is serialized into a [`JobEntry`] and inserted into a
//! [`QueueProvider`]. A [`Worker`] listening on some queues claims due
//! entries, looks their type up in a [`JobRegistry`] and records how the run
//! went. [`MemoryQueue`] is the in-process store.
//!
//! Deliveries deferred with `deliver_later` travel as
//! [`MailDeliveryJob`](crate::mail::MailDeliveryJob) entries on the mailer's
//! queue (`mailers` unless configured).
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct Digest { user_id: i64 }
//!
//! #[async_trait]
//! impl Job for Digest {
//!     const JOB_TYPE: &'static str = "digest";
//!     type Context = AppState;
//!
//!     async fn perform(self, ctx: &AppState) -> JobResult {
//!         ctx.digests.build(self.user_id).await?;
//!         Ok(None)
//!     }
//! }
//!
//! enqueue_with(&queue, Digest { user_id: 7 }, JobOpts::default().queue("digests")).await?;
//!
//! let registry = JobRegistry::new().register::<Digest>();
//! Worker::new(queue, registry, app_state).queues(["digests"]).start();
//! ```

mod entry;
mod memory;
mod registry;
mod traits;
mod worker;

pub use entry::{JobEntry, JobOpts, JobStatus, DEFAULT_QUEUE};
pub use memory::MemoryQueue;
pub use registry::JobRegistry;
pub use traits::{Job, JobResult, QueueProvider};
pub use worker::Worker;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
    /// Returned from [`Job::perform`] when running again cannot help. The
    /// worker fails the entry without scheduling a retry.
    #[error("{0}")]
    Permanent(String),
}

impl JobError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, JobError::Permanent(_))
    }
}

/// Serialize `job` with its [`Job::default_opts`].
pub fn into_entry<J: Job>(job: &J) -> Result<JobEntry, JobError> {
    into_entry_with(job, J::default_opts())
}

pub fn into_entry_with<J: Job>(job: &J, opts: JobOpts) -> Result<JobEntry, JobError> {
    Ok(JobEntry::new(J::JOB_TYPE, serde_json::to_value(job)?, &opts))
}

/// Serialize `job` and insert it, returning the entry id.
pub async fn enqueue<J: Job>(queue: &impl QueueProvider, job: J) -> Result<Uuid, JobError> {
    insert(queue, into_entry(&job)?).await
}

pub async fn enqueue_with<J: Job>(
    queue: &impl QueueProvider,
    job: J,
    opts: JobOpts,
) -> Result<Uuid, JobError> {
    insert(queue, into_entry_with(&job, opts)?).await
}

async fn insert(queue: &impl QueueProvider, entry: JobEntry) -> Result<Uuid, JobError> {
    queue.insert(&entry).await?;
    tracing::debug!(job_id = %entry.id, job_type = %entry.job_type, queue = %entry.queue, "job enqueued");
    Ok(entry.id)
}

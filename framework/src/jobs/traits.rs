use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use super::entry::{JobEntry, JobOpts};
use super::JobError;

/// What [`Job::perform`] returns: an optional result stored on the entry, or
/// an error that counts as a failed attempt. A boxed
/// [`JobError::Permanent`] fails the entry outright.
pub type JobResult = Result<Option<Value>, Box<dyn std::error::Error + Send + Sync>>;

/// A unit of background work. The struct's fields are the stored payload.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct PurgeBounces { older_than_days: u32 }
///
/// #[async_trait]
/// impl Job for PurgeBounces {
///     const JOB_TYPE: &'static str = "purge_bounces";
///     type Context = AppState;
///
///     async fn perform(self, ctx: &AppState) -> JobResult {
///         ctx.bounces.purge(self.older_than_days).await?;
///         Ok(None)
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stored on each entry and used to find the job again at run time.
    const JOB_TYPE: &'static str;

    /// State handed to `perform` by the worker.
    type Context: Send + Sync + 'static;

    fn default_opts() -> JobOpts {
        JobOpts::default()
    }

    async fn perform(self, ctx: &Self::Context) -> JobResult;
}

/// Where queued entries live.
///
/// The [`Worker`](super::Worker) decides every state transition; a provider
/// only stores entries and hands out due ones.
#[async_trait]
pub trait QueueProvider: Send + Sync + Clone + 'static {
    async fn insert(&self, entry: &JobEntry) -> Result<(), JobError>;

    /// Atomically claim the oldest due entry routed to one of `queues` (any
    /// queue when empty), marking it running for `worker_id`. A SQL backend
    /// would use `SELECT ... FOR UPDATE SKIP LOCKED`.
    async fn claim_next(
        &self,
        worker_id: &str,
        queues: &[String],
    ) -> Result<Option<JobEntry>, JobError>;

    /// Write back an entry the worker has moved to a new state.
    async fn update(&self, entry: &JobEntry) -> Result<(), JobError>;
}

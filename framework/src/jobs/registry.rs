use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use super::traits::{Job, JobResult};

type Handler<S> = Arc<
    dyn Fn(Value, Arc<S>) -> Pin<Box<dyn Future<Output = JobResult> + Send>> + Send + Sync,
>;

/// The job types a [`Worker`](super::Worker) knows how to run, keyed by
/// [`Job::JOB_TYPE`].
///
/// A worker replaying deferred deliveries registers
/// [`MailDeliveryJob`](crate::mail::MailDeliveryJob) with its state type.
pub struct JobRegistry<S: Send + Sync + 'static> {
    handlers: BTreeMap<&'static str, Handler<S>>,
}

impl<S: Send + Sync + 'static> JobRegistry<S> {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Add `J`, replacing any job registered under the same type.
    pub fn register<J: Job<Context = S>>(mut self) -> Self {
        let handler: Handler<S> = Arc::new(|payload, ctx| {
            Box::pin(async move {
                let job: J = serde_json::from_value(payload)?;
                job.perform(&ctx).await
            })
        });
        self.handlers.insert(J::JOB_TYPE, handler);
        self
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&'static str> {
        self.handlers.keys().copied().collect()
    }

    /// Decode `payload` as `job_type` and perform it. `None` when the type
    /// is not registered.
    pub(crate) async fn run(&self, job_type: &str, payload: Value, ctx: Arc<S>) -> Option<JobResult> {
        let handler = self.handlers.get(job_type)?.clone();
        Some(handler(payload, ctx).await)
    }
}

impl<S: Send + Sync + 'static> Default for JobRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

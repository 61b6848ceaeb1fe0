use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

use super::entry::{JobEntry, JobStatus};
use super::traits::QueueProvider;
use super::JobError;

/// In-process [`QueueProvider`]. Entries are kept in insertion order and are
/// lost when the process exits.
#[derive(Clone, Default)]
pub struct MemoryQueue {
    entries: Arc<Mutex<Vec<JobEntry>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<JobEntry> {
        self.entries.lock().clone()
    }

    pub async fn get(&self, id: Uuid) -> Option<JobEntry> {
        self.entries.lock().iter().find(|e| e.id == id).cloned()
    }

    /// Entries that will still be attempted.
    pub async fn pending(&self) -> Vec<JobEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.status == JobStatus::Pending)
            .cloned()
            .collect()
    }

    /// Drop completed, failed and expired entries; returns how many went.
    pub async fn prune(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| !e.status.is_finished());
        before - entries.len()
    }
}

#[async_trait]
impl QueueProvider for MemoryQueue {
    async fn insert(&self, entry: &JobEntry) -> Result<(), JobError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        queues: &[String],
    ) -> Result<Option<JobEntry>, JobError> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.entries.lock();
        let claimed = entries
            .iter_mut()
            .find(|e| e.is_due(now) && e.routed_to(queues))
            .map(|entry| {
                entry.claim(worker_id, now);
                entry.clone()
            });
        Ok(claimed)
    }

    async fn update(&self, entry: &JobEntry) -> Result<(), JobError> {
        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(stored) => {
                *stored = entry.clone();
                Ok(())
            }
            None => Err(JobError::Other(format!("no job with id {}", entry.id))),
        }
    }
}

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Queue used when none is given.
pub const DEFAULT_QUEUE: &str = "default";

/// Longest wait between two attempts of a failing job.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(300);

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Expired,
}

impl JobStatus {
    const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
        }
    }

    /// No further attempts will be made.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Expired
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status: {s}"))
    }
}

// Storage backends usually keep the status in a text column.
impl TryFrom<String> for JobStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// How a job is routed, scheduled and retried.
#[derive(Debug, Clone)]
pub struct JobOpts {
    /// Attempts allowed, the first one included.
    pub max_attempts: i32,
    /// A job still queued this long after creation is dropped as expired.
    pub expires_in: Option<Duration>,
    /// Wait before the first attempt. Wins over `run_at` when both are set.
    pub delay: Option<Duration>,
    /// Earliest time of the first attempt.
    pub run_at: Option<OffsetDateTime>,
    pub queue: String,
}

impl Default for JobOpts {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            expires_in: None,
            delay: None,
            run_at: None,
            queue: DEFAULT_QUEUE.to_string(),
        }
    }
}

impl JobOpts {
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn run_at(mut self, at: OffsetDateTime) -> Self {
        self.run_at = Some(at);
        self
    }

    pub fn max_attempts(mut self, attempts: i32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    pub(crate) fn eligible_at(&self, now: OffsetDateTime) -> OffsetDateTime {
        match (self.delay, self.run_at) {
            (Some(delay), _) => now + delay,
            (None, Some(at)) => at,
            (None, None) => now,
        }
    }
}

/// A job as stored by a [`QueueProvider`](super::QueueProvider), one record
/// per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    pub id: Uuid,
    pub job_type: String,
    pub queue: String,
    pub payload: Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
    pub locked_at: Option<OffsetDateTime>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub result: Option<Value>,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl JobEntry {
    /// A pending entry for an already serialized payload.
    pub fn new(job_type: impl Into<String>, payload: Value, opts: &JobOpts) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            job_type: job_type.into(),
            queue: opts.queue.clone(),
            payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: opts.max_attempts,
            run_at: opts.eligible_at(now),
            expires_at: opts.expires_in.map(|ttl| now + ttl),
            locked_at: None,
            locked_by: None,
            last_error: None,
            result: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// Pending and scheduled no later than `now`.
    pub fn is_due(&self, now: OffsetDateTime) -> bool {
        self.status == JobStatus::Pending && self.run_at <= now
    }

    /// Whether a worker listening on `queues` picks this entry up. An empty
    /// list listens on every queue.
    pub fn routed_to(&self, queues: &[String]) -> bool {
        queues.is_empty() || queues.iter().any(|q| *q == self.queue)
    }

    pub fn has_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    pub(crate) fn claim(&mut self, worker_id: &str, now: OffsetDateTime) {
        self.status = JobStatus::Running;
        self.attempts += 1;
        self.locked_at = Some(now);
        self.locked_by = Some(worker_id.to_string());
    }

    pub(crate) fn complete(&mut self, result: Option<Value>, now: OffsetDateTime) {
        self.status = JobStatus::Completed;
        self.result = result;
        self.completed_at = Some(now);
    }

    pub(crate) fn expire(&mut self, now: OffsetDateTime) {
        self.status = JobStatus::Expired;
        self.completed_at = Some(now);
    }

    /// Record a failed attempt. Returns the retry delay when another attempt
    /// is scheduled, `None` when the entry is now permanently failed.
    pub(crate) fn fail(&mut self, error: String, now: OffsetDateTime) -> Option<Duration> {
        self.last_error = Some(error);
        self.locked_at = None;
        self.locked_by = None;

        if self.attempts >= self.max_attempts {
            self.status = JobStatus::Failed;
            self.completed_at = Some(now);
            return None;
        }
        let delay = retry_delay(self.attempts);
        self.status = JobStatus::Pending;
        self.run_at = now + delay;
        Some(delay)
    }

    /// Fail without further attempts.
    pub(crate) fn give_up(&mut self, error: impl Into<String>, now: OffsetDateTime) {
        self.last_error = Some(error.into());
        self.locked_at = None;
        self.locked_by = None;
        self.status = JobStatus::Failed;
        self.completed_at = Some(now);
    }
}

/// Exponential backoff: 2, 4, 8, ... seconds, capped at five minutes.
fn retry_delay(attempts: i32) -> Duration {
    let exponent = u32::try_from(attempts).unwrap_or(0);
    Duration::from_secs(2_u64.saturating_pow(exponent)).min(MAX_RETRY_DELAY)
}

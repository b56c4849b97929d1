//! Durable job queue
//!
//! Jobs move `waiting → active → completed | failed`. A failed attempt with
//! budget left goes back to `waiting` with a `run_at` pushed out by the job's
//! backoff. Dequeue order is `priority` ascending, then insertion order.
//!
//! A worker holds a lease on each active job and renews it with
//! [`JobQueue::heartbeat`]. An active job whose lease has lapsed belongs to a
//! worker that died; [`JobQueue::recover_stalled`] puts it back in line, or
//! fails it when its attempts are used up.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::jobs::{JobKind, JobOptions, JobOutput, JobRecord, JobState};

mod memory;
mod postgres;

pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job {0} not found")]
    NotFound(String),

    #[error("Job {id} is {state}, expected active")]
    NotActive { id: String, state: JobState },

    #[error("Queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt job row: {0}")]
    Corrupt(String),
}

/// Outcome of a stalled-job sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveredJobs {
    /// Stalled jobs put back to `waiting`
    pub requeued: u64,
    /// Stalled jobs with no attempts left, now `failed`
    pub failed: u64,
}

impl RecoveredJobs {
    pub fn total(&self) -> u64 {
        self.requeued + self.failed
    }
}

pub(crate) fn stalled_reason(lease: Duration) -> String {
    format!("Job stalled: no heartbeat for {}s", lease.as_secs())
}

/// Result of an enqueue call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueued {
    pub id: String,
    /// False when a job with the requested id already existed
    pub created: bool,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, kind: &JobKind, options: JobOptions) -> Result<Enqueued, QueueError>;

    /// Claim the next ready job, marking it active and counting the attempt
    async fn dequeue(&self) -> Result<Option<JobRecord>, QueueError>;

    async fn complete(&self, id: &str, output: &JobOutput) -> Result<(), QueueError>;

    /// Record a failed attempt. Returns the job's new state: `Waiting` when a
    /// retry was scheduled, `Failed` otherwise.
    async fn fail(&self, id: &str, reason: &str, retryable: bool) -> Result<JobState, QueueError>;

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, QueueError>;

    /// Renew the lease of an active job
    async fn heartbeat(&self, id: &str) -> Result<(), QueueError>;

    /// Reclaim active jobs whose last heartbeat is older than `lease`
    async fn recover_stalled(&self, lease: Duration) -> Result<RecoveredJobs, QueueError>;

    /// Park an idle worker until new work may be available
    async fn wait_for_work(&self, timeout: Duration) {
        tokio::time::sleep(timeout).await;
    }
}

pub(crate) fn new_job_id(options: &JobOptions) -> String {
    options
        .job_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

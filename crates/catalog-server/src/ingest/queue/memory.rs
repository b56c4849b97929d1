//! Process-local queue

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{new_job_id, stalled_reason, Enqueued, JobQueue, QueueError, RecoveredJobs};
use crate::ingest::jobs::{JobKind, JobOptions, JobOutput, JobRecord, JobState};

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, (u64, JobRecord)>,
    /// Last heartbeat of each active job
    heartbeats: HashMap<String, Instant>,
    next_seq: u64,
}

/// In-memory [`JobQueue`] for single-process deployments and tests
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs in `state`
    pub async fn count(&self, state: JobState) -> usize {
        self.inner
            .lock()
            .await
            .jobs
            .values()
            .filter(|(_, job)| job.state == state)
            .count()
    }

    fn active<'a>(inner: &'a mut Inner, id: &str) -> Result<&'a mut JobRecord, QueueError> {
        let (_, job) = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if job.state != JobState::Active {
            return Err(QueueError::NotActive {
                id: id.to_string(),
                state: job.state,
            });
        }
        Ok(job)
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, kind: &JobKind, options: JobOptions) -> Result<Enqueued, QueueError> {
        let id = new_job_id(&options);
        let mut inner = self.inner.lock().await;

        if inner.jobs.contains_key(&id) {
            return Ok(Enqueued { id, created: false });
        }

        let now = Utc::now();
        let record = JobRecord {
            id: id.clone(),
            name: kind.name().to_string(),
            data: kind.data(),
            state: JobState::Waiting,
            priority: options.priority,
            attempts_made: 0,
            max_attempts: options.attempts,
            backoff: options.backoff,
            run_at: now,
            result: None,
            failed_reason: None,
            created_at: now,
            finished_at: None,
        };

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(id.clone(), (seq, record));
        drop(inner);

        self.notify.notify_one();
        Ok(Enqueued { id, created: true })
    }

    async fn dequeue(&self) -> Result<Option<JobRecord>, QueueError> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let next = inner
            .jobs
            .values()
            .filter(|(_, job)| job.state == JobState::Waiting && job.run_at <= now)
            .min_by_key(|(seq, job)| (job.priority, *seq))
            .map(|(_, job)| job.id.clone());

        let Some(id) = next else {
            return Ok(None);
        };

        let Some((_, job)) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.state = JobState::Active;
        job.attempts_made += 1;
        let claimed = job.clone();
        inner.heartbeats.insert(id, Instant::now());
        Ok(Some(claimed))
    }

    async fn complete(&self, id: &str, output: &JobOutput) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let job = Self::active(&mut inner, id)?;
        job.state = JobState::Completed;
        job.result = Some(output.clone());
        job.finished_at = Some(Utc::now());
        inner.heartbeats.remove(id);
        Ok(())
    }

    async fn fail(&self, id: &str, reason: &str, retryable: bool) -> Result<JobState, QueueError> {
        let mut inner = self.inner.lock().await;
        let job = Self::active(&mut inner, id)?;
        job.failed_reason = Some(reason.to_string());

        if retryable && job.can_retry() {
            let delay = job.backoff.delay_ms(job.attempts_made);
            job.state = JobState::Waiting;
            job.run_at = Utc::now() + chrono::Duration::milliseconds(delay as i64);
        } else {
            job.state = JobState::Failed;
            job.finished_at = Some(Utc::now());
        }
        let state = job.state;
        inner.heartbeats.remove(id);
        drop(inner);

        if state == JobState::Waiting {
            self.notify.notify_one();
        }
        Ok(state)
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        Ok(self
            .inner
            .lock()
            .await
            .jobs
            .get(id)
            .map(|(_, job)| job.clone()))
    }

    async fn heartbeat(&self, id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        Self::active(&mut inner, id)?;
        inner.heartbeats.insert(id.to_string(), Instant::now());
        Ok(())
    }

    async fn recover_stalled(&self, lease: Duration) -> Result<RecoveredJobs, QueueError> {
        let now = Instant::now();
        let reason = stalled_reason(lease);
        let mut inner = self.inner.lock().await;
        let Inner { jobs, heartbeats, .. } = &mut *inner;

        let mut recovered = RecoveredJobs::default();
        heartbeats.retain(|id, last_seen| {
            if now.duration_since(*last_seen) < lease {
                return true;
            }
            let Some((_, job)) = jobs.get_mut(id) else {
                return false;
            };
            job.failed_reason = Some(reason.clone());
            if job.can_retry() {
                job.state = JobState::Waiting;
                job.run_at = Utc::now();
                recovered.requeued += 1;
            } else {
                job.state = JobState::Failed;
                job.finished_at = Some(Utc::now());
                recovered.failed += 1;
            }
            false
        });
        drop(inner);

        if recovered.requeued > 0 {
            self.notify.notify_waiters();
        }
        Ok(recovered)
    }

    async fn wait_for_work(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

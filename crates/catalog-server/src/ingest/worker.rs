//! Job execution
//!
//! [`JobRunner`] dispatches one claimed job by kind. [`WorkerPool`] runs a
//! fixed number of workers, each owning one job at a time, with job starts
//! throttled across the whole pool.
//!
//! A job's input file is deleted only after the queue has settled the job
//! terminally, so a retried attempt always finds its input.
//!
//! While a job runs its worker renews the job's lease every heartbeat
//! interval. A reaper task reclaims jobs whose lease has lapsed, which only
//! happens when the worker holding them has died.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::chunk::ChunkProcessor;
use super::config::IngestConfig;
use super::jobs::{JobKind, JobOutput, JobRecord, JobState};
use super::queue::JobQueue;
use super::splitter::FileSplitter;
use super::IngestError;
use crate::cache::QueryCache;
use crate::rates::ExchangeRateProvider;

/// Runs a job to its output, one handler per [`JobKind`]
pub struct JobRunner {
    splitter: FileSplitter,
    processor: ChunkProcessor,
    rates: Arc<ExchangeRateProvider>,
    query_cache: QueryCache,
}

impl JobRunner {
    pub fn new(
        splitter: FileSplitter,
        processor: ChunkProcessor,
        rates: Arc<ExchangeRateProvider>,
        query_cache: QueryCache,
    ) -> Self {
        Self {
            splitter,
            processor,
            rates,
            query_cache,
        }
    }

    pub async fn run(&self, job: &JobRecord) -> Result<JobOutput, IngestError> {
        match job.kind().map_err(IngestError::UnsupportedKind)? {
            JobKind::SplitCsv(payload) => self
                .splitter
                .split(&job.id, &payload.file_path)
                .await
                .map(JobOutput::Split),
            JobKind::ProcessChunk(payload) => {
                let rates = self.rates.fetch_rates().await?;
                let result = self.processor.process_chunk(&job.id, &payload.file_path, &rates).await?;

                if result.processed > 0 {
                    let invalidated = self.query_cache.invalidate_all().await;
                    tracing::debug!(job_id = %job.id, keys = invalidated, "Invalidated product queries");
                }

                Ok(JobOutput::Chunk(result))
            },
        }
    }
}

pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    runner: Arc<JobRunner>,
    concurrency: usize,
    jobs_per_second: NonZeroU32,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    stall_timeout: Duration,
}

/// Running pool; dropping it leaves the workers running
pub struct WorkerPoolHandle {
    token: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<dyn JobQueue>, runner: Arc<JobRunner>, config: &IngestConfig) -> Self {
        Self {
            queue,
            runner,
            concurrency: config.worker_concurrency.max(1),
            jobs_per_second: NonZeroU32::new(config.jobs_per_second).unwrap_or(NonZeroU32::MIN),
            poll_interval: config.poll_interval(),
            heartbeat_interval: config.heartbeat_interval(),
            stall_timeout: config.stall_timeout(),
        }
    }

    pub fn start(self) -> WorkerPoolHandle {
        let token = CancellationToken::new();
        let limiter = Arc::new(RateLimiter::direct(Quota::per_second(self.jobs_per_second)));

        let mut workers: Vec<JoinHandle<()>> = (0..self.concurrency)
            .map(|worker| {
                let ctx = WorkerContext {
                    worker,
                    queue: self.queue.clone(),
                    runner: self.runner.clone(),
                    limiter: limiter.clone(),
                    poll_interval: self.poll_interval,
                    heartbeat_interval: self.heartbeat_interval,
                    token: token.clone(),
                };
                tokio::spawn(ctx.run())
            })
            .collect();
        workers.push(tokio::spawn(reap_stalled(
            self.queue.clone(),
            self.stall_timeout,
            token.clone(),
        )));

        tracing::info!(
            workers = self.concurrency,
            jobs_per_second = self.jobs_per_second.get(),
            stall_timeout_secs = self.stall_timeout.as_secs(),
            "Worker pool started"
        );

        WorkerPoolHandle { token, workers }
    }
}

impl WorkerPoolHandle {
    /// Stop claiming jobs and wait for in-flight jobs to finish
    pub async fn shutdown(self) {
        self.token.cancel();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

struct WorkerContext {
    worker: usize,
    queue: Arc<dyn JobQueue>,
    runner: Arc<JobRunner>,
    limiter: Arc<DefaultDirectRateLimiter>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    token: CancellationToken,
}

impl WorkerContext {
    async fn run(self) {
        tracing::debug!(worker = self.worker, "Worker started");

        while !self.token.is_cancelled() {
            let job = match self.queue.dequeue().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = self.queue.wait_for_work(self.poll_interval) => {},
                    }
                    continue;
                },
                Err(e) => {
                    tracing::error!(worker = self.worker, error = %e, "Failed to claim job");
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {},
                    }
                    continue;
                },
            };

            self.limiter.until_ready().await;
            self.execute(job).await;
        }

        tracing::debug!(worker = self.worker, "Worker stopped");
    }

    async fn execute(&self, job: JobRecord) {
        let input = job.kind().ok().map(|kind| kind.file_path().clone());

        tracing::info!(
            worker = self.worker,
            job_id = %job.id,
            kind = %job.name,
            attempt = job.attempts_made,
            "Job started"
        );

        let heartbeat = start_heartbeat(self.queue.clone(), job.id.clone(), self.heartbeat_interval);
        let outcome = self.runner.run(&job).await;
        heartbeat.abort();

        let settled = match outcome {
            Ok(output) => match self.queue.complete(&job.id, &output).await {
                Ok(()) => {
                    tracing::info!(job_id = %job.id, kind = %job.name, "Job completed");
                    Some(JobState::Completed)
                },
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to record job completion");
                    None
                },
            },
            Err(e) => {
                let reason = e.to_string();
                match self.queue.fail(&job.id, &reason, e.is_retryable()).await {
                    Ok(state) => Some(state),
                    Err(qe) => {
                        tracing::error!(job_id = %job.id, error = %qe, "Failed to record job failure");
                        None
                    },
                }
            },
        };

        if let (Some(state), Some(path)) = (settled, input) {
            if state.is_terminal() {
                remove_input(&job.id, &path).await;
            }
        }
    }
}

/// Renew the lease on `job_id` until aborted
fn start_heartbeat(queue: Arc<dyn JobQueue>, job_id: String, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The claim itself set the first heartbeat
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = queue.heartbeat(&job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "Failed to renew job lease");
            }
        }
    })
}

/// Periodically reclaim jobs whose worker stopped renewing their lease.
/// The first sweep runs at once, picking up jobs left by a previous process.
async fn reap_stalled(queue: Arc<dyn JobQueue>, lease: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval((lease / 2).max(Duration::from_millis(100)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {},
        }

        match queue.recover_stalled(lease).await {
            Ok(recovered) if recovered.total() > 0 => tracing::warn!(
                requeued = recovered.requeued,
                failed = recovered.failed,
                "Reclaimed stalled jobs"
            ),
            Ok(_) => {},
            Err(e) => tracing::error!(error = %e, "Failed to reclaim stalled jobs"),
        }
    }
}

async fn remove_input(job_id: &str, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(job_id = %job_id, path = %path.display(), "Removed job input"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => {
            tracing::warn!(job_id = %job_id, path = %path.display(), error = %e, "Failed to remove job input")
        },
    }
}

//! Ingestion configuration
//!
//! Tuning for the upload → split → chunk pipeline (INGEST_* environment
//! variables plus `CHUNK_SIZE`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Data lines per chunk file.
pub const DEFAULT_CHUNK_SIZE: usize = 1_000_000;

/// Valid products per bulk insert.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Jobs processed concurrently.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;

/// Job starts per second across the whole pool.
pub const DEFAULT_JOBS_PER_SECOND: u32 = 2;

/// Attempts per job before it is failed for good.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// First retry delay; doubles on every further attempt.
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

/// Idle poll interval for workers.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// How often a worker renews the lease on its running job.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Lease length; an active job without a heartbeat for this long is reclaimed.
pub const DEFAULT_STALL_TIMEOUT_SECS: u64 = 120;

/// How long `?wait=true` uploads wait for the split to finish.
pub const DEFAULT_UPLOAD_WAIT_SECS: u64 = 30;

/// Which job queue implementation backs the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Durable queue in the `ingest_jobs` table
    #[default]
    Postgres,
    /// Process-local queue; jobs are lost on restart
    Memory,
}

impl std::str::FromStr for QueueBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(QueueBackend::Postgres),
            "memory" => Ok(QueueBackend::Memory),
            _ => Err(anyhow::anyhow!(
                "Invalid INGEST_QUEUE_BACKEND: {}. Must be 'postgres' or 'memory'",
                s
            )),
        }
    }
}

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Where uploaded files land before splitting
    pub upload_dir: PathBuf,
    /// Where chunk files are written
    pub chunk_dir: PathBuf,
    pub chunk_size: usize,
    pub batch_size: usize,
    pub worker_concurrency: usize,
    pub jobs_per_second: u32,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub stall_timeout_secs: u64,
    pub queue_backend: QueueBackend,
    pub upload_wait_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            upload_dir: std::env::temp_dir().join("catalog-uploads"),
            chunk_dir: std::env::temp_dir().join("catalog-chunks"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            jobs_per_second: DEFAULT_JOBS_PER_SECOND,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_ms: DEFAULT_BACKOFF_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            stall_timeout_secs: DEFAULT_STALL_TIMEOUT_SECS,
            queue_backend: QueueBackend::default(),
            upload_wait_secs: DEFAULT_UPLOAD_WAIT_SECS,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let queue_backend = match std::env::var("INGEST_QUEUE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.queue_backend,
        };

        let config = Self {
            upload_dir: std::env::var("INGEST_UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.upload_dir),
            chunk_dir: std::env::var("INGEST_CHUNK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.chunk_dir),
            chunk_size: env_parse("CHUNK_SIZE", defaults.chunk_size),
            batch_size: env_parse("INGEST_BATCH_SIZE", defaults.batch_size),
            worker_concurrency: env_parse("INGEST_WORKER_CONCURRENCY", defaults.worker_concurrency),
            jobs_per_second: env_parse("INGEST_JOBS_PER_SECOND", defaults.jobs_per_second),
            max_attempts: env_parse("INGEST_MAX_ATTEMPTS", defaults.max_attempts),
            backoff_ms: env_parse("INGEST_BACKOFF_MS", defaults.backoff_ms),
            poll_interval_ms: env_parse("INGEST_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            heartbeat_interval_secs: env_parse(
                "INGEST_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            ),
            stall_timeout_secs: env_parse("INGEST_STALL_TIMEOUT_SECS", defaults.stall_timeout_secs),
            queue_backend,
            upload_wait_secs: env_parse("INGEST_UPLOAD_WAIT_SECS", defaults.upload_wait_secs),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            anyhow::bail!("CHUNK_SIZE must be greater than 0");
        }
        if self.batch_size == 0 {
            anyhow::bail!("INGEST_BATCH_SIZE must be greater than 0");
        }
        if self.worker_concurrency == 0 {
            anyhow::bail!("INGEST_WORKER_CONCURRENCY must be greater than 0");
        }
        if self.jobs_per_second == 0 {
            anyhow::bail!("INGEST_JOBS_PER_SECOND must be greater than 0");
        }
        if self.max_attempts == 0 {
            anyhow::bail!("INGEST_MAX_ATTEMPTS must be greater than 0");
        }
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("INGEST_HEARTBEAT_INTERVAL_SECS must be greater than 0");
        }
        if self.stall_timeout_secs <= self.heartbeat_interval_secs {
            anyhow::bail!(
                "INGEST_STALL_TIMEOUT_SECS ({}) must exceed INGEST_HEARTBEAT_INTERVAL_SECS ({})",
                self.stall_timeout_secs,
                self.heartbeat_interval_secs
            );
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }

    pub fn upload_wait(&self) -> Duration {
        Duration::from_secs(self.upload_wait_secs)
    }
}

//! CSV catalog ingestion
//!
//! # Architecture
//!
//! - **config**: tuning (INGEST_* environment variables, `CHUNK_SIZE`)
//! - **jobs**: job kinds, options and stored results
//! - **queue**: durable job queue (Postgres) and an in-process variant
//! - **row**: per-line validation into [`row::NewProduct`]
//! - **splitter**: uploaded file → header-carrying chunk files + chunk jobs
//! - **chunk**: chunk file → validated, bulk-inserted products
//! - **worker**: bounded, rate-limited pool that runs queued jobs
//! - **status**: job status lookup and per-upload summaries
//!
//! Flow: upload → `split-csv` → N × `process-csv-chunk` → products table,
//! followed by query cache invalidation.

use std::path::PathBuf;
use thiserror::Error;

pub mod chunk;
pub mod config;
pub mod jobs;
pub mod queue;
pub mod row;
pub mod splitter;
pub mod status;
pub mod worker;

pub use chunk::ChunkProcessor;
pub use config::{IngestConfig, QueueBackend};
pub use jobs::{ChunkResult, JobKind, JobOptions, JobOutput, JobState, SplitOutput, ValidationError};
pub use queue::{JobQueue, MemoryJobQueue, PgJobQueue, QueueError, RecoveredJobs};
pub use splitter::FileSplitter;
pub use status::{JobStatus, UploadSummary};
pub use worker::{JobRunner, WorkerPool, WorkerPoolHandle};

/// Errors that fail a job attempt
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv_async::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Rates(#[from] crate::rates::RatesError),

    #[error("Failed to persist batch of {rows} rows: {source}")]
    Storage {
        rows: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("{0}")]
    UnsupportedKind(String),
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, IngestError::UnsupportedKind(_))
    }
}

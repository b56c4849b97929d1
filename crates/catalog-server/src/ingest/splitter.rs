//! File splitting
//!
//! Streams an uploaded file into chunk files of at most `chunk_size` data
//! lines, each starting with the original header, and enqueues one
//! `process-csv-chunk` job per chunk as soon as the chunk is closed.
//!
//! Chunk job ids are `<split job id>-<index>`. A chunk whose job already
//! exists is skipped, so re-running a split after a failed attempt never
//! enqueues the same chunk twice.

use csv_async::{AsyncReaderBuilder, AsyncWriter, AsyncWriterBuilder, ByteRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;

use super::config::IngestConfig;
use super::jobs::{Backoff, JobKind, JobOptions, SplitOutput};
use super::queue::JobQueue;
use super::IngestError;

/// Lower runs first, so pending splits are claimed before chunk jobs
pub const CHUNK_JOB_PRIORITY: i32 = 1;

pub struct FileSplitter {
    queue: Arc<dyn JobQueue>,
    chunk_dir: PathBuf,
    chunk_size: usize,
    chunk_options: JobOptions,
}

struct OpenChunk {
    id: String,
    path: PathBuf,
    // None when the chunk's job already exists and its rows are skipped
    writer: Option<AsyncWriter<File>>,
    rows: usize,
}

impl OpenChunk {
    async fn write(&mut self, record: &ByteRecord) -> Result<(), IngestError> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_byte_record(record).await?;
        }
        self.rows += 1;
        Ok(())
    }
}

pub fn chunk_job_id(split_id: &str, index: usize) -> String {
    format!("{}-{}", split_id, index)
}

impl FileSplitter {
    pub fn new(queue: Arc<dyn JobQueue>, config: &IngestConfig) -> Self {
        Self {
            queue,
            chunk_dir: config.chunk_dir.clone(),
            chunk_size: config.chunk_size.max(1),
            chunk_options: JobOptions::default()
                .with_priority(CHUNK_JOB_PRIORITY)
                .with_attempts(config.max_attempts)
                .with_backoff(Backoff::exponential(config.backoff_ms)),
        }
    }

    /// Split `path` and enqueue its chunks. Returns every chunk job id in
    /// chunk order. A file holding only a header yields no chunks.
    pub async fn split(&self, split_id: &str, path: &Path) -> Result<SplitOutput, IngestError> {
        let file = File::open(path).await.map_err(|e| IngestError::io(path, e))?;
        let mut reader = AsyncReaderBuilder::new()
            .delimiter(b';')
            .quote(b'"')
            .has_headers(false)
            .flexible(true)
            .create_reader(file);

        let mut header = ByteRecord::new();
        if !reader.read_byte_record(&mut header).await? {
            tracing::warn!(split_id = %split_id, path = %path.display(), "Uploaded file is empty");
            return Ok(SplitOutput::default());
        }

        let mut job_ids = Vec::new();
        let mut current: Option<OpenChunk> = None;
        let mut record = ByteRecord::new();

        while reader.read_byte_record(&mut record).await? {
            let mut chunk = match current.take() {
                Some(chunk) => chunk,
                None => self.open_chunk(split_id, job_ids.len(), &header).await?,
            };
            chunk.write(&record).await?;

            if chunk.rows >= self.chunk_size {
                job_ids.push(self.close_chunk(chunk).await?);
            } else {
                current = Some(chunk);
            }
        }

        if let Some(partial) = current.take() {
            job_ids.push(self.close_chunk(partial).await?);
        }

        tracing::info!(
            split_id = %split_id,
            path = %path.display(),
            chunks = job_ids.len(),
            "File split completed"
        );

        Ok(SplitOutput { job_ids })
    }

    async fn open_chunk(
        &self,
        split_id: &str,
        index: usize,
        header: &ByteRecord,
    ) -> Result<OpenChunk, IngestError> {
        let id = chunk_job_id(split_id, index);
        let path = self.chunk_dir.join(format!("{}.csv", id));

        if self.queue.get(&id).await?.is_some() {
            tracing::debug!(job_id = %id, "Chunk job already enqueued, skipping its rows");
            return Ok(OpenChunk {
                id,
                path,
                writer: None,
                rows: 0,
            });
        }

        let file = File::create(&path)
            .await
            .map_err(|e| IngestError::io(&path, e))?;
        let mut writer = AsyncWriterBuilder::new()
            .delimiter(b';')
            .flexible(true)
            .create_writer(file);
        writer.write_byte_record(header).await?;

        Ok(OpenChunk {
            id,
            path,
            writer: Some(writer),
            rows: 0,
        })
    }

    async fn close_chunk(&self, chunk: OpenChunk) -> Result<String, IngestError> {
        let Some(mut writer) = chunk.writer else {
            return Ok(chunk.id);
        };
        writer.flush().await.map_err(|e| IngestError::io(&chunk.path, e))?;
        drop(writer);

        let options = self.chunk_options.clone().with_id(chunk.id.clone());
        self.queue.enqueue(&JobKind::chunk(chunk.path.clone()), options).await?;

        tracing::info!(
            job_id = %chunk.id,
            rows = chunk.rows,
            path = %chunk.path.display(),
            "Chunk job enqueued"
        );

        Ok(chunk.id)
    }
}

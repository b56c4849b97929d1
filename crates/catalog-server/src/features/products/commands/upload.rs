use axum::extract::Multipart;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::error::AppError;
use crate::ingest::jobs::{Backoff, JobKind, JobOptions, JobOutput, JobState};
use crate::ingest::{IngestConfig, JobQueue, QueueError};

pub const UPLOAD_ACCEPTED_MESSAGE: &str = "File upload accepted for processing";

/// A CSV file already streamed to `file_path`
#[derive(Debug, Clone)]
pub struct UploadCommand {
    pub upload_id: String,
    pub file_path: PathBuf,
    /// Wait for the split and answer with chunk job ids
    pub wait: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub job_ids: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Please upload a valid CSV file")]
    InvalidFileType,
    #[error("No file uploaded")]
    MissingFile,
    #[error("Failed to read upload: {0}")]
    Multipart(String),
    #[error("Failed to store upload: {0}")]
    Storage(#[from] std::io::Error),
    #[error("Failed to enqueue upload: {0}")]
    Queue(#[from] QueueError),
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::InvalidFileType | UploadError::MissingFile | UploadError::Multipart(_) => {
                AppError::BadRequest(err.to_string())
            },
            UploadError::Storage(e) => AppError::Io(e),
            UploadError::Queue(e) => AppError::Internal(e.to_string()),
        }
    }
}

fn is_csv(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("csv"))
}

/// Stream the multipart `file` field to `upload_dir` without buffering it.
///
/// Returns the new upload's id and path. Fields other than `file` are
/// ignored; a `file` field that is not CSV is rejected before any byte is
/// written.
pub async fn receive(
    mut multipart: Multipart,
    upload_dir: &Path,
) -> Result<(String, PathBuf), UploadError> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Multipart(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        if !is_csv(field.content_type()) {
            return Err(UploadError::InvalidFileType);
        }

        let upload_id = uuid::Uuid::new_v4().to_string();
        let path = upload_dir.join(format!("{}.csv", upload_id));
        let mut file = tokio::fs::File::create(&path).await?;

        let mut written: u64 = 0;
        loop {
            let chunk = match field.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    discard(&path).await;
                    return Err(UploadError::Multipart(e.to_string()));
                },
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                discard(&path).await;
                return Err(UploadError::Storage(e));
            }
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::info!(upload_id = %upload_id, bytes = written, "Upload stored");
        return Ok((upload_id, path));
    }

    Err(UploadError::MissingFile)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial upload");
    }
}

#[tracing::instrument(skip(queue, config), fields(upload_id = %command.upload_id))]
pub async fn handle(
    queue: &dyn JobQueue,
    config: &IngestConfig,
    command: UploadCommand,
) -> Result<UploadResponse, UploadError> {
    let options = JobOptions::default()
        .with_id(command.upload_id.clone())
        .with_attempts(config.max_attempts)
        .with_backoff(Backoff::exponential(config.backoff_ms));

    let enqueued = match queue.enqueue(&JobKind::split(command.file_path.clone()), options).await {
        Ok(enqueued) => enqueued,
        Err(e) => {
            discard(&command.file_path).await;
            return Err(e.into());
        },
    };

    let job_ids = if command.wait {
        wait_for_split(queue, &enqueued.id, config.upload_wait(), config.poll_interval()).await?
    } else {
        vec![enqueued.id]
    };

    Ok(UploadResponse {
        message: UPLOAD_ACCEPTED_MESSAGE.to_string(),
        job_ids,
    })
}

/// Chunk job ids once the split completes in time, else the split job id
async fn wait_for_split(
    queue: &dyn JobQueue,
    split_id: &str,
    window: Duration,
    poll: Duration,
) -> Result<Vec<String>, UploadError> {
    let poll_until_settled = async {
        loop {
            if let Some(job) = queue.get(split_id).await? {
                if job.state.is_terminal() {
                    return Ok::<_, QueueError>(job);
                }
            }
            tokio::time::sleep(poll).await;
        }
    };

    match tokio::time::timeout(window, poll_until_settled).await {
        Ok(Ok(job)) => match (job.state, job.result) {
            (JobState::Completed, Some(JobOutput::Split(output))) => Ok(output.job_ids),
            _ => Ok(vec![split_id.to_string()]),
        },
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            tracing::debug!(split_id = %split_id, "Split still running, returning split job id");
            Ok(vec![split_id.to_string()])
        },
    }
}

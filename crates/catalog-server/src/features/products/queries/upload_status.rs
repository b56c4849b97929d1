use crate::error::AppError;
use crate::ingest::status::{get_status, JobStatus};
use crate::ingest::{JobQueue, QueueError};

#[derive(Debug, Clone)]
pub struct UploadStatusQuery {
    pub job_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadStatusError {
    #[error("Job {0} not found")]
    NotFound(String),
    #[error("Failed to read job status: {0}")]
    Queue(QueueError),
}

impl From<QueueError> for UploadStatusError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(id) => Self::NotFound(id),
            other => Self::Queue(other),
        }
    }
}

impl From<UploadStatusError> for AppError {
    fn from(err: UploadStatusError) -> Self {
        match err {
            UploadStatusError::NotFound(_) => AppError::NotFound(err.to_string()),
            UploadStatusError::Queue(e) => AppError::Internal(e.to_string()),
        }
    }
}

pub async fn handle(
    queue: &dyn JobQueue,
    query: UploadStatusQuery,
) -> Result<JobStatus, UploadStatusError> {
    Ok(get_status(queue, &query.job_id).await?)
}

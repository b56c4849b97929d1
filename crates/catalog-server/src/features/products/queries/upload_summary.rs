use crate::error::AppError;
use crate::ingest::status::{summarize, UploadSummary};
use crate::ingest::{JobQueue, QueueError};

#[derive(Debug, Clone)]
pub struct UploadSummaryQuery {
    /// Split job id returned by the upload endpoint
    pub upload_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadSummaryError {
    #[error("Upload {0} not found")]
    NotFound(String),
    #[error("Failed to summarize upload: {0}")]
    Queue(QueueError),
}

impl From<QueueError> for UploadSummaryError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::NotFound(id) => Self::NotFound(id),
            other => Self::Queue(other),
        }
    }
}

impl From<UploadSummaryError> for AppError {
    fn from(err: UploadSummaryError) -> Self {
        match err {
            UploadSummaryError::NotFound(_) => AppError::NotFound(err.to_string()),
            UploadSummaryError::Queue(QueueError::Corrupt(message)) => AppError::BadRequest(message),
            UploadSummaryError::Queue(e) => AppError::Internal(e.to_string()),
        }
    }
}

pub async fn handle(
    queue: &dyn JobQueue,
    query: UploadSummaryQuery,
) -> Result<UploadSummary, UploadSummaryError> {
    Ok(summarize(queue, &query.upload_id).await?)
}

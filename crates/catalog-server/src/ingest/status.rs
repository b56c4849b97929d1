//! Job status lookup and upload summaries

use serde::Serialize;

use super::jobs::{JobOutput, JobRecord, JobState, ValidationError};
use super::queue::{JobQueue, QueueError};

/// Status of a single job as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ValidationError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_ids: Option<Vec<String>>,
}

impl JobStatus {
    fn pending(state: JobState) -> Self {
        Self {
            status: state,
            processed: None,
            errors: None,
            job_ids: None,
        }
    }
}

impl From<&JobRecord> for JobStatus {
    fn from(job: &JobRecord) -> Self {
        match job.state {
            JobState::Completed => match &job.result {
                Some(JobOutput::Chunk(result)) => Self {
                    processed: Some(result.processed),
                    errors: Some(result.errors.clone()),
                    ..Self::pending(job.state)
                },
                Some(JobOutput::Split(split)) => Self {
                    job_ids: Some(split.job_ids.clone()),
                    ..Self::pending(job.state)
                },
                None => Self::pending(job.state),
            },
            JobState::Failed => Self {
                processed: Some(0),
                errors: Some(vec![failure(job)]),
                ..Self::pending(job.state)
            },
            JobState::Waiting | JobState::Active => Self::pending(job.state),
        }
    }
}

/// Line 0 marks the job-level error of a failed job
fn failure(job: &JobRecord) -> ValidationError {
    ValidationError {
        line: 0,
        error: job
            .failed_reason
            .clone()
            .unwrap_or_else(|| "Job failed".to_string()),
    }
}

pub async fn get_status(queue: &dyn JobQueue, id: &str) -> Result<JobStatus, QueueError> {
    let job = queue
        .get(id)
        .await?
        .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
    Ok(JobStatus::from(&job))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// The file has not been split yet
    Pending,
    /// Some chunks are still queued or running
    Processing,
    /// Every chunk finished and none failed
    Completed,
    /// Every job settled and at least one failed
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChunkCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadError {
    pub job_id: String,
    pub line: u64,
    pub error: String,
}

/// Aggregate view of one upload across its split and chunk jobs
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub status: UploadState,
    pub job_ids: Vec<String>,
    pub chunks: ChunkCounts,
    pub processed: u64,
    pub errors: Vec<UploadError>,
}

impl UploadSummary {
    fn empty(status: UploadState) -> Self {
        Self {
            status,
            job_ids: Vec::new(),
            chunks: ChunkCounts::default(),
            processed: 0,
            errors: Vec::new(),
        }
    }
}

pub async fn summarize(queue: &dyn JobQueue, split_id: &str) -> Result<UploadSummary, QueueError> {
    let split = queue
        .get(split_id)
        .await?
        .ok_or_else(|| QueueError::NotFound(split_id.to_string()))?;

    let job_ids = match (split.state, &split.result) {
        (JobState::Waiting | JobState::Active, _) => return Ok(UploadSummary::empty(UploadState::Pending)),
        (JobState::Failed, _) => {
            let failed = failure(&split);
            let mut summary = UploadSummary::empty(UploadState::Failed);
            summary.errors.push(UploadError {
                job_id: split.id.clone(),
                line: failed.line,
                error: failed.error,
            });
            return Ok(summary);
        },
        (JobState::Completed, Some(JobOutput::Split(output))) => output.job_ids.clone(),
        (JobState::Completed, _) => {
            return Err(QueueError::Corrupt(format!("Job {} is not a split job", split_id)))
        },
    };

    let mut summary = UploadSummary::empty(UploadState::Processing);
    summary.chunks.total = job_ids.len();

    for id in &job_ids {
        let Some(chunk) = queue.get(id).await? else {
            summary.chunks.pending += 1;
            continue;
        };

        match (chunk.state, &chunk.result) {
            (JobState::Completed, result) => {
                summary.chunks.completed += 1;
                if let Some(JobOutput::Chunk(result)) = result {
                    summary.processed += result.processed;
                    summary.errors.extend(result.errors.iter().map(|e| UploadError {
                        job_id: id.clone(),
                        line: e.line,
                        error: e.error.clone(),
                    }));
                }
            },
            (JobState::Failed, _) => {
                summary.chunks.failed += 1;
                let failed = failure(&chunk);
                summary.errors.push(UploadError {
                    job_id: id.clone(),
                    line: failed.line,
                    error: failed.error,
                });
            },
            (JobState::Waiting | JobState::Active, _) => summary.chunks.pending += 1,
        }
    }

    summary.status = match (summary.chunks.pending, summary.chunks.failed) {
        (0, 0) => UploadState::Completed,
        (0, _) => UploadState::Failed,
        _ => UploadState::Processing,
    };
    summary.job_ids = job_ids;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::jobs::{ChunkResult, JobKind, JobOptions, SplitOutput};
    use crate::ingest::queue::MemoryJobQueue;
    use serde_json::json;

    async fn settle(queue: &MemoryJobQueue, id: &str, output: Option<JobOutput>) {
        let job = queue.dequeue().await.unwrap().unwrap();
        assert_eq!(job.id, id);
        match output {
            Some(output) => queue.complete(id, &output).await.unwrap(),
            None => {
                queue.fail(id, "Failed to fetch exchange rates", false).await.unwrap();
            },
        }
    }

    fn chunk_output(processed: u64, errors: Vec<(u64, &str)>) -> JobOutput {
        JobOutput::Chunk(ChunkResult {
            processed,
            errors: errors
                .into_iter()
                .map(|(line, error)| ValidationError {
                    line,
                    error: error.to_string(),
                })
                .collect(),
        })
    }

    #[tokio::test]
    async fn test_status_not_found() {
        let queue = MemoryJobQueue::new();
        let err = get_status(&queue, "nope").await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_status_waiting_then_completed() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue(&JobKind::chunk("/c.csv"), JobOptions::default().with_id("c-0"))
            .await
            .unwrap();

        let waiting = get_status(&queue, "c-0").await.unwrap();
        assert_eq!(serde_json::to_value(&waiting).unwrap(), json!({"status": "waiting"}));

        settle(&queue, "c-0", Some(chunk_output(1, vec![(2, "bad name")]))).await;
        let done = get_status(&queue, "c-0").await.unwrap();
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"status": "completed", "processed": 1, "errors": [{"line": 2, "error": "bad name"}]})
        );
    }

    #[tokio::test]
    async fn test_status_failed_uses_line_zero() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue(&JobKind::chunk("/c.csv"), JobOptions::default().with_id("c-0"))
            .await
            .unwrap();
        settle(&queue, "c-0", None).await;

        let status = get_status(&queue, "c-0").await.unwrap();
        assert_eq!(status.status, JobState::Failed);
        assert_eq!(status.processed, Some(0));
        assert_eq!(
            status.errors,
            Some(vec![ValidationError {
                line: 0,
                error: "Failed to fetch exchange rates".to_string()
            }])
        );
    }

    #[tokio::test]
    async fn test_summary_aggregates_chunks() {
        let queue = MemoryJobQueue::new();
        queue
            .enqueue(&JobKind::split("/u.csv"), JobOptions::default().with_id("s"))
            .await
            .unwrap();

        assert_eq!(summarize(&queue, "s").await.unwrap().status, UploadState::Pending);

        for id in ["s-0", "s-1", "s-2"] {
            queue
                .enqueue(
                    &JobKind::chunk(format!("/{}.csv", id)),
                    JobOptions::default().with_id(id).with_priority(1),
                )
                .await
                .unwrap();
        }
        settle(
            &queue,
            "s",
            Some(JobOutput::Split(SplitOutput {
                job_ids: vec!["s-0".into(), "s-1".into(), "s-2".into()],
            })),
        )
        .await;
        settle(&queue, "s-0", Some(chunk_output(3, vec![(4, "bad price")]))).await;

        let partial = summarize(&queue, "s").await.unwrap();
        assert_eq!(partial.status, UploadState::Processing);
        assert_eq!(
            partial.chunks,
            ChunkCounts {
                total: 3,
                completed: 1,
                failed: 0,
                pending: 2
            }
        );

        settle(&queue, "s-1", Some(chunk_output(5, vec![]))).await;
        settle(&queue, "s-2", None).await;

        let done = summarize(&queue, "s").await.unwrap();
        assert_eq!(done.status, UploadState::Failed);
        assert_eq!(done.processed, 8);
        assert_eq!(done.chunks.pending, 0);
        assert_eq!(
            done.errors,
            vec![
                UploadError {
                    job_id: "s-0".into(),
                    line: 4,
                    error: "bad price".into()
                },
                UploadError {
                    job_id: "s-2".into(),
                    line: 0,
                    error: "Failed to fetch exchange rates".into()
                },
            ]
        );
    }
}

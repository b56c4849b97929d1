//! Job definitions for the ingestion queue
//!
//! Jobs are stored as a `(name, data)` pair so a row written by another
//! version of the server can still be loaded and failed explicitly when its
//! kind is unknown here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Queue name shared by every ingestion job.
pub const QUEUE_NAME: &str = "csv-processing";

/// Payload carried by both job kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePayload {
    #[serde(rename = "filePath")]
    pub file_path: PathBuf,
}

/// Every kind of work the pipeline knows how to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum JobKind {
    /// Split an uploaded file into header-carrying chunks
    #[serde(rename = "split-csv")]
    SplitCsv(FilePayload),
    /// Validate and persist one chunk
    #[serde(rename = "process-csv-chunk")]
    ProcessChunk(FilePayload),
}

impl JobKind {
    pub fn split(file_path: impl Into<PathBuf>) -> Self {
        JobKind::SplitCsv(FilePayload {
            file_path: file_path.into(),
        })
    }

    pub fn chunk(file_path: impl Into<PathBuf>) -> Self {
        JobKind::ProcessChunk(FilePayload {
            file_path: file_path.into(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::SplitCsv(_) => "split-csv",
            JobKind::ProcessChunk(_) => "process-csv-chunk",
        }
    }

    /// The input file this job consumes
    pub fn file_path(&self) -> &PathBuf {
        match self {
            JobKind::SplitCsv(p) | JobKind::ProcessChunk(p) => &p.file_path,
        }
    }

    /// Payload without the kind tag
    pub fn data(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove("data").unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    /// Rebuild a kind from its stored parts
    pub fn decode(name: &str, data: &Value) -> Result<Self, String> {
        serde_json::from_value(serde_json::json!({ "name": name, "data": data }))
            .map_err(|_| format!("Unsupported job kind: {}", name))
    }
}

/// One row-level problem inside a chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub line: u64,
    pub error: String,
}

/// Outcome of a chunk job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub processed: u64,
    pub errors: Vec<ValidationError>,
}

/// Outcome of a split job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOutput {
    #[serde(rename = "jobIds")]
    pub job_ids: Vec<String>,
}

/// Stored result of a completed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    Split(SplitOutput),
    Chunk(ChunkResult),
}

/// Lifecycle of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("Unknown job state: {}", other)),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry delay policy: `base_ms × 2^(attempt-1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub base_ms: u64,
}

impl Backoff {
    pub fn exponential(base_ms: u64) -> Self {
        Self { base_ms }
    }

    /// Delay before the retry that follows attempt number `attempt` (1-based)
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(32);
        self.base_ms.saturating_mul(1u64 << exponent)
    }
}

/// Enqueue options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Caller-chosen id; enqueueing an existing id is a no-op
    pub job_id: Option<String>,
    /// Lower runs first
    pub priority: i32,
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            job_id: None,
            priority: 0,
            attempts: 3,
            backoff: Backoff::exponential(1000),
        }
    }
}

impl JobOptions {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// A job as stored by a queue backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub data: Value,
    pub state: JobState,
    pub priority: i32,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub run_at: DateTime<Utc>,
    pub result: Option<JobOutput>,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn kind(&self) -> Result<JobKind, String> {
        JobKind::decode(&self.name, &self.data)
    }

    /// Whether a failure now would schedule another attempt
    pub fn can_retry(&self) -> bool {
        self.attempts_made < self.max_attempts
    }
}

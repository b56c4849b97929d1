//! Queue backed by the `ingest_jobs` table

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::time::Duration;

use super::{new_job_id, stalled_reason, Enqueued, JobQueue, QueueError, RecoveredJobs};
use crate::ingest::jobs::{Backoff, JobKind, JobOptions, JobOutput, JobRecord, JobState};

const JOB_COLUMNS: &str = "id, name, data, state, priority, attempts_made, max_attempts, \
                           backoff_ms, run_at, result, failed_reason, created_at, finished_at";

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    data: Value,
    state: String,
    priority: i32,
    attempts_made: i32,
    max_attempts: i32,
    backoff_ms: i64,
    run_at: DateTime<Utc>,
    result: Option<Value>,
    failed_reason: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = row.state.parse().map_err(QueueError::Corrupt)?;
        let result = row.result.map(serde_json::from_value::<JobOutput>).transpose()?;

        Ok(JobRecord {
            id: row.id,
            name: row.name,
            data: row.data,
            state,
            priority: row.priority,
            attempts_made: row.attempts_made.max(0) as u32,
            max_attempts: row.max_attempts.max(0) as u32,
            backoff: Backoff::exponential(row.backoff_ms.max(0) as u64),
            run_at: row.run_at,
            result,
            failed_reason: row.failed_reason,
            created_at: row.created_at,
            finished_at: row.finished_at,
        })
    }
}

/// Postgres [`JobQueue`]
///
/// Several processes can share one table: claims use `SKIP LOCKED`, and stalled
/// jobs are only reclaimed once their heartbeat lease has lapsed, so a live
/// worker in another process keeps its job.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, kind: &JobKind, options: JobOptions) -> Result<Enqueued, QueueError> {
        let id = new_job_id(&options);

        let result = sqlx::query(
            r#"
            INSERT INTO ingest_jobs (id, name, data, priority, max_attempts, backoff_ms)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(kind.name())
        .bind(kind.data())
        .bind(options.priority)
        .bind(options.attempts as i32)
        .bind(options.backoff.base_ms as i64)
        .execute(&self.pool)
        .await?;

        Ok(Enqueued {
            id,
            created: result.rows_affected() == 1,
        })
    }

    async fn dequeue(&self) -> Result<Option<JobRecord>, QueueError> {
        let sql = format!(
            r#"
            UPDATE ingest_jobs
            SET state = 'active',
                attempts_made = attempts_made + 1,
                started_at = NOW(),
                heartbeat_at = NOW()
            WHERE id = (
                SELECT id FROM ingest_jobs
                WHERE state = 'waiting' AND run_at <= NOW()
                ORDER BY priority, seq
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn complete(&self, id: &str, output: &JobOutput) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE ingest_jobs
            SET state = 'completed',
                result = $2,
                finished_at = NOW()
            WHERE id = $1 AND state = 'active'
            "#,
        )
        .bind(id)
        .bind(serde_json::to_value(output)?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.not_active(id).await);
        }
        Ok(())
    }

    async fn fail(&self, id: &str, reason: &str, retryable: bool) -> Result<JobState, QueueError> {
        let row: Option<(String, i32, i32)> = sqlx::query_as(
            r#"
            UPDATE ingest_jobs
            SET state = CASE
                    WHEN $3 AND attempts_made < max_attempts THEN 'waiting'
                    ELSE 'failed'
                END,
                run_at = CASE
                    WHEN $3 AND attempts_made < max_attempts
                        THEN NOW() + (backoff_ms * power(2, attempts_made - 1)) * INTERVAL '1 millisecond'
                    ELSE run_at
                END,
                finished_at = CASE
                    WHEN $3 AND attempts_made < max_attempts THEN NULL
                    ELSE NOW()
                END,
                failed_reason = $2
            WHERE id = $1 AND state = 'active'
            RETURNING state, attempts_made, max_attempts
            "#,
        )
        .bind(id)
        .bind(reason)
        .bind(retryable)
        .fetch_optional(&self.pool)
        .await?;

        let Some((state, attempts_made, max_attempts)) = row else {
            return Err(self.not_active(id).await);
        };
        let state: JobState = state.parse().map_err(QueueError::Corrupt)?;

        if state == JobState::Failed {
            tracing::error!(
                job_id = %id,
                attempts_made,
                error = %reason,
                "Job failed permanently"
            );
        } else {
            tracing::warn!(
                job_id = %id,
                attempts_made,
                max_attempts,
                error = %reason,
                "Job failed, will retry"
            );
        }

        Ok(state)
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM ingest_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn heartbeat(&self, id: &str) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE ingest_jobs
            SET heartbeat_at = NOW()
            WHERE id = $1 AND state = 'active'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.not_active(id).await);
        }
        Ok(())
    }

    async fn recover_stalled(&self, lease: Duration) -> Result<RecoveredJobs, QueueError> {
        let states: Vec<(String,)> = sqlx::query_as(
            r#"
            WITH stalled AS (
                SELECT id FROM ingest_jobs
                WHERE state = 'active'
                  AND COALESCE(heartbeat_at, started_at, run_at)
                      < NOW() - make_interval(secs => $1)
                FOR UPDATE SKIP LOCKED
            )
            UPDATE ingest_jobs j
            SET state = CASE
                    WHEN j.attempts_made < j.max_attempts THEN 'waiting'
                    ELSE 'failed'
                END,
                run_at = NOW(),
                finished_at = CASE
                    WHEN j.attempts_made < j.max_attempts THEN NULL
                    ELSE NOW()
                END,
                failed_reason = $2,
                heartbeat_at = NULL
            FROM stalled
            WHERE j.id = stalled.id
            RETURNING j.state
            "#,
        )
        .bind(lease.as_secs_f64())
        .bind(stalled_reason(lease))
        .fetch_all(&self.pool)
        .await?;

        let mut recovered = RecoveredJobs::default();
        for (state,) in states {
            match state.parse::<JobState>().map_err(QueueError::Corrupt)? {
                JobState::Failed => recovered.failed += 1,
                _ => recovered.requeued += 1,
            }
        }
        Ok(recovered)
    }
}

impl PgJobQueue {
    async fn not_active(&self, id: &str) -> QueueError {
        match self.get(id).await {
            Ok(Some(job)) => QueueError::NotActive {
                id: id.to_string(),
                state: job.state,
            },
            Ok(None) => QueueError::NotFound(id.to_string()),
            Err(e) => e,
        }
    }
}

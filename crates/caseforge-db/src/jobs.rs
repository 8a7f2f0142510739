//! Processing job repository implementation.
//!
//! The partial unique index `idx_processing_job_active` backs the
//! one-active-job-per-(document, type) rule; every status transition is
//! guarded by `status IN ('pending', 'processing')` so terminal rows never change.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use caseforge_core::{new_v7, Error, JobRepository, JobType, ProcessingJob, Result};

const JOB_COLUMNS: &str = "id, document_id, job_type::text AS job_type, status::text AS status,
    progress_percent, progress_message, total_items, error_message, result,
    created_at, started_at, completed_at";

/// PostgreSQL implementation of JobRepository.
#[derive(Clone)]
pub struct PgJobRepository {
    pool: Pool<Postgres>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<ProcessingJob> {
        let job_type: String = row.get("job_type");
        let status: String = row.get("status");
        Ok(ProcessingJob {
            id: row.get("id"),
            document_id: row.get("document_id"),
            job_type: job_type.parse().map_err(Error::Internal)?,
            status: status.parse().map_err(Error::Internal)?,
            progress_percent: row.get("progress_percent"),
            progress_message: row.get("progress_message"),
            total_items: row.get("total_items"),
            error_message: row.get("error_message"),
            result: row.get("result"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create_exclusive(
        &self,
        document_id: Uuid,
        job_type: JobType,
    ) -> Result<ProcessingJob> {
        let violation = || Error::ConcurrencyViolation {
            document_id,
            job_type: job_type.to_string(),
        };

        // The NOT EXISTS guard handles the common case; the partial unique
        // index catches the race between two concurrent inserts.
        let row = sqlx::query(&format!(
            "INSERT INTO processing_job (id, document_id, job_type, status, created_at)
             SELECT $1, $2, $3::job_type, 'pending'::job_status, $4
             WHERE NOT EXISTS (
                 SELECT 1 FROM processing_job
                 WHERE document_id = $2 AND job_type = $3::job_type
                   AND status IN ('pending'::job_status, 'processing'::job_status)
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(new_v7())
        .bind(document_id)
        .bind(job_type.as_str())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if Self::is_unique_violation(&e) {
                violation()
            } else {
                Error::Database(e)
            }
        })?;

        match row {
            Some(row) => Self::parse_job_row(row),
            None => Err(violation()),
        }
    }

    async fn mark_processing(&self, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE processing_job
             SET status = 'processing'::job_status, started_at = $1
             WHERE id = $2 AND status = 'pending'::job_status",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_progress(
        &self,
        job_id: Uuid,
        percent: i32,
        message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE processing_job
             SET progress_percent = GREATEST(progress_percent, $1),
                 progress_message = CASE WHEN $1 >= progress_percent
                                         THEN COALESCE($2, progress_message)
                                         ELSE progress_message END
             WHERE id = $3
               AND status IN ('pending'::job_status, 'processing'::job_status)",
        )
        .bind(percent.clamp(0, 100))
        .bind(message)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn set_total_items(&self, job_id: Uuid, total: i32) -> Result<()> {
        sqlx::query("UPDATE processing_job SET total_items = $1 WHERE id = $2")
            .bind(total)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE processing_job
             SET status = 'completed'::job_status, completed_at = $1, result = $2,
                 progress_percent = 100
             WHERE id = $3
               AND status IN ('pending'::job_status, 'processing'::job_status)",
        )
        .bind(Utc::now())
        .bind(&result)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(updated.rows_affected() > 0)
    }

    async fn fail(&self, job_id: Uuid, error: &str, result: Option<JsonValue>) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE processing_job
             SET status = 'failed'::job_status, completed_at = $1,
                 error_message = COALESCE(error_message, $2),
                 result = COALESCE($3, result)
             WHERE id = $4
               AND status IN ('pending'::job_status, 'processing'::job_status)",
        )
        .bind(Utc::now())
        .bind(error)
        .bind(&result)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(updated.rows_affected() > 0)
    }

    async fn cancel(&self, job_id: Uuid) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE processing_job
             SET status = 'cancelled'::job_status, completed_at = $1
             WHERE id = $2
               AND status IN ('pending'::job_status, 'processing'::job_status)",
        )
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(updated.rows_affected() > 0)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ProcessingJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_job WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_job_row).transpose()
    }

    async fn active_for_document(
        &self,
        document_id: Uuid,
        job_type: JobType,
    ) -> Result<Option<ProcessingJob>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_job
             WHERE document_id = $1 AND job_type = $2::job_type
               AND status IN ('pending'::job_status, 'processing'::job_status)
             LIMIT 1"
        ))
        .bind(document_id)
        .bind(job_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.map(Self::parse_job_row).transpose()
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM processing_job
             WHERE document_id = $1
             ORDER BY created_at DESC"
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(Self::parse_job_row).collect()
    }
}

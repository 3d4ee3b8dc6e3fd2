use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::job::Job;
use crate::store::JobStore;

/// Stores each job as one JSONB blob. `status` is duplicated into its own
/// column for operators querying the table directly.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn get(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        let row: Option<(Json<Job>,)> = sqlx::query_as("SELECT data FROM watch_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(Json(job),)| job))
    }

    async fn put(&self, job: &Job) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO watch_jobs (id, status, data, created_at, updated_at) VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, data = EXCLUDED.data, updated_at = EXCLUDED.updated_at",
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(Json(job))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM watch_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ids(&self) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM watch_jobs ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

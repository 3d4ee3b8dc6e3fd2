// Job persistence.
// The engine only needs get/put/delete of whole job records; `ids` backs the
// listing surface.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::job::Job;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

/// Key-value store of serialized job records, keyed by job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Job>, AppError>;

    /// Insert or replace the whole record.
    async fn put(&self, job: &Job) -> Result<(), AppError>;

    async fn delete(&self, id: Uuid) -> Result<(), AppError>;

    async fn ids(&self) -> Result<Vec<Uuid>, AppError>;
}

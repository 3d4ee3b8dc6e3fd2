use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::job::Job;
use crate::store::JobStore;

/// Process-local store. Records are kept serialized so readers always get
/// an independent snapshot.
#[derive(Default)]
pub struct MemoryJobStore {
    blobs: RwLock<HashMap<Uuid, Vec<u8>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, id: Uuid) -> Result<Option<Job>, AppError> {
        let blobs = self.blobs.read().await;
        blobs
            .get(&id)
            .map(|blob| serde_json::from_slice(blob).map_err(AppError::from))
            .transpose()
    }

    async fn put(&self, job: &Job) -> Result<(), AppError> {
        let blob = serde_json::to_vec(job)?;
        self.blobs.write().await.insert(job.id, blob);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), AppError> {
        self.blobs.write().await.remove(&id);
        Ok(())
    }

    async fn ids(&self) -> Result<Vec<Uuid>, AppError> {
        let mut ids: Vec<Uuid> = self.blobs.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::models::job::{JobConfig, JobStatus, MatchMode};

    fn job() -> Job {
        Job::new(JobConfig {
            unit_keys: vec![NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()],
            category: "female".to_string(),
            queries: vec!["asha".to_string()],
            interval_secs: 60,
            verification_code: None,
            match_mode: MatchMode::Strict,
        })
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryJobStore::new();
        let mut job = job();
        store.put(&job).await.unwrap();

        job.status = JobStatus::Running;
        let snapshot = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Created);

        store.put(&job).await.unwrap();
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Running);
        assert_eq!(store.ids().await.unwrap(), vec![job.id]);

        store.delete(job.id).await.unwrap();
        assert!(store.get(job.id).await.unwrap().is_none());
        assert!(store.ids().await.unwrap().is_empty());
    }
}

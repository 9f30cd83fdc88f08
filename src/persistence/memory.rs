use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Result, ServerError};
use crate::model::{Job, JobStatus, Resource, Worker};
use crate::persistence::PersistenceGateway;

/// In-process persistence gateway.
///
/// Backs the default server mode and the test suite. State does not survive
/// a restart; workers are expected to re-pledge, which rebuilds the worker
/// table the same way it rebuilds the connection registry.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    workers: RwLock<HashMap<Uuid, Worker>>,
    jobs: RwLock<HashMap<Uuid, Job>>,
    resources: RwLock<HashMap<Uuid, Resource>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted jobs, for diagnostics.
    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryPersistence {
    async fn upsert_worker(&self, worker: Worker) -> Result<()> {
        self.workers.write().await.insert(worker.id, worker);
        Ok(())
    }

    async fn fetch_all_workers(&self) -> Result<Vec<Worker>> {
        let mut workers: Vec<Worker> = self.workers.read().await.values().cloned().collect();
        workers.sort_by_key(|w| w.id);
        Ok(workers)
    }

    async fn fetch_active_workers(&self) -> Result<Vec<Worker>> {
        let mut workers: Vec<Worker> = self
            .workers
            .read()
            .await
            .values()
            .filter(|w| w.is_active)
            .cloned()
            .collect();
        workers.sort_by_key(|w| w.id);
        Ok(workers)
    }

    async fn upsert_job(&self, job: Job) -> Result<()> {
        self.jobs.write().await.insert(job.id, job);
        Ok(())
    }

    async fn fetch_jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.id);
        Ok(jobs)
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        checked_out_by: Option<Uuid>,
    ) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(ServerError::JobNotFound(job_id))?;
        job.status = status;
        job.checked_out_by = checked_out_by;
        Ok(())
    }

    async fn upsert_resource(&self, resource: Resource) -> Result<()> {
        self.resources.write().await.insert(resource.id, resource);
        Ok(())
    }

    async fn fetch_resource(&self, resource_id: Uuid) -> Result<Option<Resource>> {
        Ok(self.resources.read().await.get(&resource_id).cloned())
    }
}

pub mod memory;

pub use memory::MemoryPersistence;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Job, JobStatus, Resource, Worker};

/// Durable store for jobs, workers, and resource blobs.
///
/// This is the single source of truth for scheduler state. Implementations
/// must provide per-record atomic upsert semantics; no cross-record
/// transaction is assumed, every write commits individually. The relational
/// implementation lives outside this crate; [`MemoryPersistence`] backs the
/// default server mode and the test suite.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Insert or replace a worker record keyed by worker id.
    async fn upsert_worker(&self, worker: Worker) -> Result<()>;

    async fn fetch_all_workers(&self) -> Result<Vec<Worker>>;

    async fn fetch_active_workers(&self) -> Result<Vec<Worker>>;

    /// Insert or replace a job record keyed by job id.
    async fn upsert_job(&self, job: Job) -> Result<()>;

    async fn fetch_jobs_with_status(&self, status: JobStatus) -> Result<Vec<Job>>;

    /// Update a job's status and checkout owner in one write.
    ///
    /// `checked_out_by` must be `Some` exactly when `status` is
    /// [`JobStatus::Processing`]; callers own that invariant.
    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        checked_out_by: Option<Uuid>,
    ) -> Result<()>;

    /// Insert or replace a resource blob keyed by resource id.
    async fn upsert_resource(&self, resource: Resource) -> Result<()>;

    async fn fetch_resource(&self, resource_id: Uuid) -> Result<Option<Resource>>;
}

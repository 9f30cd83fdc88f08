use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{CodeVersion, Job, JobStatus, Resource, Worker, FILE_FORMAT_VERSION};
use crate::net::message::{JobSubmission, Message, ResourceFormat};
use crate::net::registry::{ChannelHandle, ConnectionRegistry};
use crate::persistence::PersistenceGateway;

/// Shared server state, explicitly constructed at startup and passed by
/// reference to every component that needs it.
pub struct ServerContext {
    pub registry: ConnectionRegistry,
    pub persistence: Arc<dyn PersistenceGateway>,
    /// Serializes the upsert-then-register pair inside pledge handling so a
    /// worker cannot race its own reconnect into a registry/store split.
    pledge_lock: Mutex<()>,
}

impl ServerContext {
    pub fn new(registry: ConnectionRegistry, persistence: Arc<dyn PersistenceGateway>) -> Self {
        Self {
            registry,
            persistence,
            pledge_lock: Mutex::new(()),
        }
    }
}

/// Single entry point for inbound protocol traffic: one operation per message
/// variant, each a transactional unit against the persistence gateway.
///
/// A failed operation is fatal to that message only; the caller logs it and
/// keeps the connection open.
pub struct MessageRouter {
    ctx: Arc<ServerContext>,
}

impl MessageRouter {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self { ctx }
    }

    pub async fn dispatch(&self, channel: &ChannelHandle, message: Message) -> Result<()> {
        match message {
            Message::WorkerPledge {
                worker_id,
                throughputs,
                active,
                file_format_version,
                code_version,
            } => {
                self.accept_pledge(
                    channel,
                    worker_id,
                    throughputs,
                    active,
                    file_format_version,
                    code_version,
                )
                .await
            }
            Message::SendResource {
                resource_id,
                data,
                format,
            } => self.accept_resource(resource_id, &data, format).await,
            Message::RequestResource {
                resource_id,
                format,
            } => {
                self.handle_resource_request(channel, resource_id, format)
                    .await
            }
            Message::CreateJob { job } => self.accept_job(job).await,
            Message::ReportJobCompletion {
                worker_id,
                job_id,
                succeeded,
            } => self.accept_completion(worker_id, job_id, succeeded).await,
            Message::AssignJob { .. } => {
                // Server-to-worker only; a peer sending it is misbehaving.
                tracing::warn!(connection = %channel.connection_id(), "Ignoring inbound AssignJob");
                Ok(())
            }
        }
    }

    /// Upsert the worker record, then bind the connection in the registry.
    async fn accept_pledge(
        &self,
        channel: &ChannelHandle,
        worker_id: Uuid,
        throughputs: Vec<u32>,
        active: bool,
        file_format_version: i32,
        code_version: CodeVersion,
    ) -> Result<()> {
        let _guard = self.ctx.pledge_lock.lock().await;

        let worker = Worker::new(
            worker_id,
            throughputs,
            active,
            Utc::now(),
            file_format_version,
            code_version,
        );
        self.ctx.persistence.upsert_worker(worker).await?;
        self.ctx.registry.register(worker_id, channel.clone());

        tracing::info!(
            worker_id = %worker_id,
            active,
            connection = %channel.connection_id(),
            "Worker pledged"
        );
        Ok(())
    }

    /// Canonicalize the payload and persist it under the resource id.
    async fn accept_resource(
        &self,
        resource_id: Uuid,
        data: &str,
        format: ResourceFormat,
    ) -> Result<()> {
        let json_data = format.decode_to_canonical(data)?;
        let resource = Resource::new(resource_id, json_data, FILE_FORMAT_VERSION);
        self.ctx.persistence.upsert_resource(resource).await?;

        tracing::debug!(resource_id = %resource_id, ?format, "Resource stored");
        Ok(())
    }

    /// Reply with the resource in the requested format, or silently do
    /// nothing when the id is unknown.
    async fn handle_resource_request(
        &self,
        channel: &ChannelHandle,
        resource_id: Uuid,
        format: ResourceFormat,
    ) -> Result<()> {
        let Some(resource) = self.ctx.persistence.fetch_resource(resource_id).await? else {
            tracing::debug!(resource_id = %resource_id, "Requested resource not found, no reply");
            return Ok(());
        };

        let data = format.encode_from_canonical(&resource.json_data);
        let reply = Message::SendResource {
            resource_id,
            data,
            format,
        };
        if !channel.send(reply) {
            tracing::warn!(
                resource_id = %resource_id,
                connection = %channel.connection_id(),
                "Connection closed before resource reply could be queued"
            );
        }
        Ok(())
    }

    /// Persist a new job with status Blocked and no checkout; the enforcer
    /// promotes it once its dependencies are done.
    async fn accept_job(&self, submission: JobSubmission) -> Result<()> {
        let job = Job::new(
            submission.job_id,
            submission.kind,
            submission.priority,
            submission.dependencies,
            submission.input_resources,
            submission.output_resources,
        );
        let job_id = job.id;
        let kind = job.kind.clone();
        self.ctx.persistence.upsert_job(job).await?;

        tracing::info!(job_id = %job_id, ?kind, "Job created");
        Ok(())
    }

    /// Move a checked-out job to its terminal state. Reports for a job the
    /// reporting worker does not hold are logged and dropped, which keeps
    /// terminal states immutable and checkouts exclusive.
    async fn accept_completion(
        &self,
        worker_id: Uuid,
        job_id: Uuid,
        succeeded: bool,
    ) -> Result<()> {
        let processing = self
            .ctx
            .persistence
            .fetch_jobs_with_status(JobStatus::Processing)
            .await?;

        let Some(job) = processing.iter().find(|j| j.id == job_id) else {
            tracing::warn!(job_id = %job_id, worker_id = %worker_id, "Completion report for a job not in Processing, ignored");
            return Ok(());
        };
        if job.checked_out_by != Some(worker_id) {
            tracing::warn!(
                job_id = %job_id,
                worker_id = %worker_id,
                checked_out_by = ?job.checked_out_by,
                "Completion report from a worker that does not hold the job, ignored"
            );
            return Ok(());
        }

        let status = if succeeded {
            JobStatus::Done
        } else {
            JobStatus::Failed
        };
        self.ctx
            .persistence
            .update_job_status(job_id, status, None)
            .await?;

        tracing::info!(job_id = %job_id, worker_id = %worker_id, %status, "Job completed");
        Ok(())
    }
}

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Job, JobStatus, Worker};
use crate::net::message::Message;
use crate::net::registry::ConnectionRegistry;
use crate::persistence::PersistenceGateway;
use crate::scheduler::assignments::JobAssignments;

/// Periodic reconciliation of job assignments against worker capacity.
///
/// Each pass advances job statuses, computes a greedy desired assignment of
/// Waiting + Processing jobs onto active workers, and moves the live
/// checkouts toward that plan only when the move strictly improves the
/// aggregate priority-weighted throughput score.
///
/// Concurrency control is optimistic: the pass reads a snapshot at the start
/// and treats the world as possibly stale by the time it writes. A losing
/// race degrades to skipping that worker's reassignment, never to failing
/// the pass.
pub struct WorkloadEnforcer {
    persistence: Arc<dyn PersistenceGateway>,
    registry: ConnectionRegistry,
    stale_worker_timeout: Duration,
}

impl WorkloadEnforcer {
    pub fn new(
        persistence: Arc<dyn PersistenceGateway>,
        registry: ConnectionRegistry,
        stale_worker_timeout: Duration,
    ) -> Self {
        Self {
            persistence,
            registry,
            stale_worker_timeout,
        }
    }

    /// Run passes on a fixed interval until the shutdown token fires.
    ///
    /// Passes never overlap: the next tick is not serviced until the current
    /// pass returns. A failed pass is logged and the next tick retries from
    /// a fresh snapshot.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Workload enforcer stopping");
                    break;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.enforce_once().await {
                        tracing::warn!(error = %e, "Enforcement pass failed");
                    }
                }
            }
        }
    }

    /// One full reconciliation pass.
    pub async fn enforce_once(&self) -> Result<()> {
        self.deactivate_stale_workers().await?;
        self.promote_unblocked_jobs().await?;

        let workers = self.persistence.fetch_active_workers().await?;
        let waiting = self
            .persistence
            .fetch_jobs_with_status(JobStatus::Waiting)
            .await?;
        let processing = self
            .persistence
            .fetch_jobs_with_status(JobStatus::Processing)
            .await?;

        // Candidate jobs in priority order, ties broken by id so replays of
        // the same snapshot produce the same plan.
        let mut candidates: Vec<Job> = waiting
            .into_iter()
            .chain(processing.iter().cloned())
            .collect();
        candidates.sort_by_key(|j| (Reverse(j.priority), j.id));

        let desired = Self::build_desired_assignments(&workers, &candidates);
        let actual = Self::build_actual_assignments(&workers, &processing);

        let desired_score = desired.total_score();
        let actual_score = actual.total_score();
        if desired_score <= actual_score {
            tracing::debug!(desired_score, actual_score, "Live assignment already optimal");
            return Ok(());
        }
        tracing::info!(
            desired_score,
            actual_score,
            planned_jobs = desired.assigned_job_count(),
            workers = workers.len(),
            "Moving live assignments toward desired plan"
        );

        self.apply_plan(&desired, &candidates, &processing).await
    }

    /// Greedy single-pass assignment: offer each job, in priority order, to
    /// the worker whose score improves the most. Choices are irrevocable
    /// within the pass; a job with no positive delta anywhere stays
    /// unassigned and is reconsidered next pass.
    fn build_desired_assignments(workers: &[Worker], jobs: &[Job]) -> JobAssignments {
        let mut assignments = JobAssignments::new(workers);
        for job in jobs {
            let mut best: Option<(f64, Uuid)> = None;
            for worker in workers {
                let Some(delta) = assignments.score_change_for_job(worker.id, job.priority) else {
                    continue;
                };
                if delta > 0.0 && best.map_or(true, |(best_delta, _)| delta > best_delta) {
                    best = Some((delta, worker.id));
                }
            }
            if let Some((_, worker_id)) = best {
                assignments.assign(worker_id, job.id, job.priority);
            }
        }
        assignments
    }

    /// The live assignment, tallied straight from checkout fields. A job
    /// checked out by an unknown worker, or beyond a worker's curve, scores
    /// nothing; it is a misplacement for the plan diff to repair, not an
    /// error.
    fn build_actual_assignments(workers: &[Worker], processing: &[Job]) -> JobAssignments {
        let mut assignments = JobAssignments::new(workers);
        for job in processing {
            let Some(worker_id) = job.checked_out_by else {
                tracing::warn!(job_id = %job.id, "Processing job without a checkout, skipping");
                continue;
            };
            if assignments.has_capacity(worker_id) {
                assignments.assign(worker_id, job.id, job.priority);
            } else {
                tracing::warn!(
                    job_id = %job.id,
                    worker_id = %worker_id,
                    "Checkout exceeds worker capacity or worker is gone, scored as misplaced"
                );
            }
        }
        assignments
    }

    /// Issue the minimal set of check-ins and check-outs that moves the live
    /// state toward `desired`. Correctly placed jobs are untouched.
    async fn apply_plan(
        &self,
        desired: &JobAssignments,
        candidates: &[Job],
        processing: &[Job],
    ) -> Result<()> {
        // Check in jobs the plan moves elsewhere or leaves unassigned.
        let mut placed: HashSet<Uuid> = HashSet::new();
        for job in processing {
            let target = desired.worker_for_job(job.id);
            if target == job.checked_out_by {
                placed.insert(job.id);
            } else {
                self.persistence
                    .update_job_status(job.id, JobStatus::Waiting, None)
                    .await?;
                tracing::debug!(
                    job_id = %job.id,
                    worker = ?job.checked_out_by,
                    "Checked job back in"
                );
            }
        }

        // Check out the rest of the plan. A target worker without a live
        // channel is skipped; its jobs stay Waiting until it reconnects.
        for job in candidates {
            let Some(target) = desired.worker_for_job(job.id) else {
                continue;
            };
            if placed.contains(&job.id) {
                continue;
            }
            let Some(channel) = self.registry.lookup(target) else {
                tracing::debug!(
                    job_id = %job.id,
                    worker_id = %target,
                    "Target worker has no live channel, deferring checkout"
                );
                continue;
            };

            self.persistence
                .update_job_status(job.id, JobStatus::Processing, Some(target))
                .await?;

            let mut assigned = job.clone();
            assigned.status = JobStatus::Processing;
            assigned.checked_out_by = Some(target);
            if !channel.send(Message::AssignJob { job: assigned }) {
                // Notification only; the checkout stands and the next pass
                // repairs it if the worker is really gone.
                tracing::warn!(
                    job_id = %job.id,
                    worker_id = %target,
                    "Assignment notification failed"
                );
            }
            tracing::debug!(job_id = %job.id, worker_id = %target, "Checked job out");
        }
        Ok(())
    }

    /// Deactivate workers whose last pledge is older than the configured
    /// timeout. A later pledge reactivates them.
    async fn deactivate_stale_workers(&self) -> Result<()> {
        let now = Utc::now();
        for worker in self.persistence.fetch_active_workers().await? {
            if worker.is_stale(now, self.stale_worker_timeout) {
                tracing::info!(
                    worker_id = %worker.id,
                    last_activity = %worker.last_activity,
                    "Deactivating stale worker"
                );
                let mut stale = worker;
                stale.is_active = false;
                self.persistence.upsert_worker(stale).await?;
            }
        }
        Ok(())
    }

    /// Blocked jobs whose dependencies have all reached Done become Waiting.
    /// A dependency id that was never submitted gates its dependents forever.
    async fn promote_unblocked_jobs(&self) -> Result<()> {
        let blocked = self
            .persistence
            .fetch_jobs_with_status(JobStatus::Blocked)
            .await?;
        if blocked.is_empty() {
            return Ok(());
        }

        let done: HashSet<Uuid> = self
            .persistence
            .fetch_jobs_with_status(JobStatus::Done)
            .await?
            .into_iter()
            .map(|j| j.id)
            .collect();

        for job in blocked {
            if job.dependencies.iter().all(|dep| done.contains(dep)) {
                self.persistence
                    .update_job_status(job.id, JobStatus::Waiting, None)
                    .await?;
                tracing::debug!(job_id = %job.id, "Dependencies satisfied, job now waiting");
            }
        }
        Ok(())
    }
}

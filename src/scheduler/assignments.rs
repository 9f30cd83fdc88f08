use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::model::Worker;

/// Per-worker bookkeeping for one assignment plan.
#[derive(Debug, Clone)]
struct WorkerSlot {
    throughputs: Vec<u32>,
    job_count: usize,
    /// priority level -> number of assigned jobs at that level.
    priority_counts: BTreeMap<i32, u32>,
    score: f64,
}

impl WorkerSlot {
    fn new(throughputs: Vec<u32>) -> Self {
        Self {
            throughputs,
            job_count: 0,
            priority_counts: BTreeMap::new(),
            score: 0.0,
        }
    }

    /// Score of this worker's whole job multiset evaluated at `job_count`
    /// concurrent jobs: the throughput achievable at that load, amortized
    /// evenly over the jobs, weighted by each job's priority.
    fn score_at(throughputs: &[u32], job_count: usize, priority_counts: &BTreeMap<i32, u32>) -> f64 {
        if job_count == 0 {
            return 0.0;
        }
        let per_job = throughputs[job_count - 1] as f64 / job_count as f64;
        priority_counts
            .iter()
            .map(|(priority, count)| *count as f64 * per_job * *priority as f64)
            .sum()
    }
}

/// One pass's job-to-worker assignment, either hypothetical (the greedy
/// desired plan) or reconstructed from live checkouts (the actual plan).
///
/// Transient: built, compared, and discarded within a single enforcement
/// pass. Score queries never mutate, so a caller can probe every worker for
/// a job before committing the best one.
#[derive(Debug, Clone)]
pub struct JobAssignments {
    workers: BTreeMap<Uuid, WorkerSlot>,
    /// job id -> worker id, for the reconciliation diff.
    plan: HashMap<Uuid, Uuid>,
}

impl JobAssignments {
    pub fn new(workers: &[Worker]) -> Self {
        let workers = workers
            .iter()
            .map(|w| (w.id, WorkerSlot::new(w.throughputs.clone())))
            .collect();
        Self {
            workers,
            plan: HashMap::new(),
        }
    }

    /// Whether the worker can take one more job: it must exist in this plan
    /// and have a throughput entry for the next load level. A worker with an
    /// empty curve, or one already at the end of its curve, is not eligible.
    pub fn has_capacity(&self, worker_id: Uuid) -> bool {
        self.workers
            .get(&worker_id)
            .is_some_and(|slot| slot.job_count < slot.throughputs.len())
    }

    /// Score delta of hypothetically giving `worker_id` one more job at
    /// `priority`: the whole multiset plus the job, scored at the new load
    /// level, minus the current multiset rebased at that same load. Both
    /// sides share the load level, so the change reduces to the incoming
    /// job's amortized share, `throughputs[n] / (n + 1)`, weighted by its
    /// priority. `None` if the worker has no capacity.
    pub fn score_change_for_job(&self, worker_id: Uuid, priority: i32) -> Option<f64> {
        let slot = self.workers.get(&worker_id)?;
        if slot.job_count >= slot.throughputs.len() {
            return None;
        }

        let new_load = slot.job_count + 1;
        let mut with_job = slot.priority_counts.clone();
        *with_job.entry(priority).or_insert(0) += 1;
        let new_score = WorkerSlot::score_at(&slot.throughputs, new_load, &with_job);
        let rebased = WorkerSlot::score_at(&slot.throughputs, new_load, &slot.priority_counts);
        Some(new_score - rebased)
    }

    /// Commit a job to a worker, updating its count, priority tally, and
    /// score. Callers check capacity first.
    pub fn assign(&mut self, worker_id: Uuid, job_id: Uuid, priority: i32) {
        let slot = self
            .workers
            .get_mut(&worker_id)
            .expect("assign called for a worker not in this plan");
        debug_assert!(slot.job_count < slot.throughputs.len());

        slot.job_count += 1;
        *slot.priority_counts.entry(priority).or_insert(0) += 1;
        slot.score = WorkerSlot::score_at(&slot.throughputs, slot.job_count, &slot.priority_counts);
        self.plan.insert(job_id, worker_id);
    }

    /// The worker this plan gives the job to, if any.
    pub fn worker_for_job(&self, job_id: Uuid) -> Option<Uuid> {
        self.plan.get(&job_id).copied()
    }

    pub fn worker_score(&self, worker_id: Uuid) -> Option<f64> {
        self.workers.get(&worker_id).map(|slot| slot.score)
    }

    pub fn worker_job_count(&self, worker_id: Uuid) -> Option<usize> {
        self.workers.get(&worker_id).map(|slot| slot.job_count)
    }

    /// Aggregate score across all workers; the reconciliation comparator.
    pub fn total_score(&self) -> f64 {
        self.workers.values().map(|slot| slot.score).sum()
    }

    pub fn assigned_job_count(&self) -> usize {
        self.plan.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CodeVersion, Worker, FILE_FORMAT_VERSION};
    use chrono::Utc;

    fn worker(throughputs: Vec<u32>) -> Worker {
        Worker::new(
            Uuid::new_v4(),
            throughputs,
            true,
            Utc::now(),
            FILE_FORMAT_VERSION,
            CodeVersion::new(0, 1, 0),
        )
    }

    #[test]
    fn empty_plan_scores_zero() {
        let w = worker(vec![100]);
        let plan = JobAssignments::new(&[w.clone()]);
        assert_eq!(plan.total_score(), 0.0);
        assert_eq!(plan.worker_score(w.id), Some(0.0));
    }

    #[test]
    fn single_job_scores_full_throughput_times_priority() {
        let w = worker(vec![100, 150]);
        let mut plan = JobAssignments::new(&[w.clone()]);

        let delta = plan.score_change_for_job(w.id, 3).unwrap();
        assert_eq!(delta, 300.0);

        plan.assign(w.id, Uuid::new_v4(), 3);
        assert_eq!(plan.worker_score(w.id), Some(300.0));
    }

    #[test]
    fn second_job_amortizes_over_both() {
        // Curve [100, 150]: two jobs share 150 total, 75 each. The second
        // job's delta is its amortized share at the new load.
        let w = worker(vec![100, 150]);
        let mut plan = JobAssignments::new(&[w.clone()]);
        plan.assign(w.id, Uuid::new_v4(), 1);

        let delta = plan.score_change_for_job(w.id, 1).unwrap();
        assert_eq!(delta, 75.0);

        // The stored score amortizes the whole multiset at the final load.
        plan.assign(w.id, Uuid::new_v4(), 1);
        assert_eq!(plan.worker_score(w.id), Some(150.0));
    }

    #[test]
    fn no_capacity_beyond_curve_length() {
        let w = worker(vec![100]);
        let mut plan = JobAssignments::new(&[w.clone()]);
        assert!(plan.has_capacity(w.id));

        plan.assign(w.id, Uuid::new_v4(), 1);
        assert!(!plan.has_capacity(w.id));
        assert!(plan.score_change_for_job(w.id, 1).is_none());
    }

    #[test]
    fn empty_curve_never_has_capacity() {
        let w = worker(vec![]);
        let plan = JobAssignments::new(&[w.clone()]);
        assert!(!plan.has_capacity(w.id));
        assert!(plan.score_change_for_job(w.id, 5).is_none());
    }

    #[test]
    fn unknown_worker_has_no_capacity() {
        let plan = JobAssignments::new(&[]);
        assert!(!plan.has_capacity(Uuid::new_v4()));
        assert!(plan.score_change_for_job(Uuid::new_v4(), 1).is_none());
    }

    #[test]
    fn score_query_does_not_mutate() {
        let w = worker(vec![100, 150]);
        let plan = JobAssignments::new(&[w.clone()]);

        let first = plan.score_change_for_job(w.id, 2).unwrap();
        let second = plan.score_change_for_job(w.id, 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(plan.worker_job_count(w.id), Some(0));
    }

    #[test]
    fn each_addition_on_a_rising_curve_has_positive_delta() {
        let w = worker(vec![100, 150, 200]);
        let mut plan = JobAssignments::new(&[w.clone()]);
        for priority in [5, 5, 1] {
            let delta = plan.score_change_for_job(w.id, priority).unwrap();
            assert!(delta > 0.0, "delta {delta} for priority {priority}");
            plan.assign(w.id, Uuid::new_v4(), priority);
        }
        assert_eq!(plan.worker_job_count(w.id), Some(3));
    }

    #[test]
    fn mixed_priorities_amortize_at_final_load() {
        // Curve [100,150,200], priorities 5,5,1: the final load of 3
        // amortizes 200/3 per job across the whole multiset.
        let w = worker(vec![100, 150, 200]);
        let mut plan = JobAssignments::new(&[w.clone()]);
        plan.assign(w.id, Uuid::new_v4(), 5);
        plan.assign(w.id, Uuid::new_v4(), 5);
        plan.assign(w.id, Uuid::new_v4(), 1);

        let expected = (200.0 / 3.0) * 11.0;
        let score = plan.worker_score(w.id).unwrap();
        assert!((score - expected).abs() < 1e-9);
        assert!((score - 733.33).abs() < 0.01);
    }
}

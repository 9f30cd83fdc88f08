use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Has unsatisfied dependencies; not eligible for assignment.
    Blocked,
    /// All dependencies done; eligible for assignment.
    Waiting,
    /// Checked out by exactly one active worker.
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    /// Done and Failed are immutable end states.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Blocked => write!(f, "blocked"),
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Done => write!(f, "done"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The work a job carries. Closed set: the router and the workers match on
/// this exhaustively, so a new kind fails to compile until every site handles
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    /// Build a world from a blueprint resource and store it.
    CreateWorld,
    /// Advance a stored world until the given tick.
    RunSimulation { end_tick: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: JobKind,
    pub status: JobStatus,
    /// Higher value = more urgent. Ties broken by job id for determinism.
    pub priority: i32,
    /// Set iff status == Processing.
    pub checked_out_by: Option<Uuid>,
    /// Job ids that must all reach Done before this job leaves Blocked.
    pub dependencies: Vec<Uuid>,
    pub input_resources: Vec<Uuid>,
    pub output_resources: Vec<Uuid>,
}

impl Job {
    /// A freshly submitted job always starts Blocked with no checkout; the
    /// enforcer promotes it to Waiting once its dependencies are done.
    pub fn new(
        id: Uuid,
        kind: JobKind,
        priority: i32,
        dependencies: Vec<Uuid>,
        input_resources: Vec<Uuid>,
        output_resources: Vec<Uuid>,
    ) -> Self {
        Self {
            id,
            kind,
            status: JobStatus::Blocked,
            priority,
            checked_out_by: None,
            dependencies,
            input_resources,
            output_resources,
        }
    }
}

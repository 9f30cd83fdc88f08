pub mod assignments;
pub mod enforcer;

pub use assignments::JobAssignments;
pub use enforcer::WorkloadEnforcer;

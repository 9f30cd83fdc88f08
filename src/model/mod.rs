pub mod job;
pub mod resource;
pub mod worker;

pub use job::{Job, JobKind, JobStatus};
pub use resource::Resource;
pub use worker::{CodeVersion, Worker};

/// Version stamp written into every persisted resource and carried by worker
/// pledges. Bumped when the canonical resource encoding changes shape.
pub const FILE_FORMAT_VERSION: i32 = 1;

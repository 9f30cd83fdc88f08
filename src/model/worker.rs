use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Semantic version of the worker binary, reported in pledges so the server
/// can spot incompatible workers in its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl CodeVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl std::fmt::Display for CodeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// A worker's persisted capacity record, refreshed on every pledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    /// Achievable throughput indexed by concurrent job count: entry `i` is
    /// the worker's total throughput while carrying `i + 1` jobs. The length
    /// bounds how many jobs the worker may hold at once.
    pub throughputs: Vec<u32>,
    /// Inactive workers keep their history but are skipped by the enforcer.
    pub is_active: bool,
    pub last_activity: DateTime<Utc>,
    pub file_format_version: i32,
    pub code_version: CodeVersion,
}

impl Worker {
    pub fn new(
        id: Uuid,
        throughputs: Vec<u32>,
        is_active: bool,
        last_activity: DateTime<Utc>,
        file_format_version: i32,
        code_version: CodeVersion,
    ) -> Self {
        Self {
            id,
            throughputs,
            is_active,
            last_activity,
            file_format_version,
            code_version,
        }
    }

    /// Maximum number of jobs this worker may hold concurrently.
    pub fn max_concurrency(&self) -> usize {
        self.throughputs.len()
    }

    /// A worker that has not pledged within `timeout` is considered stale and
    /// gets deactivated by the enforcer.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let age = now.signed_duration_since(self.last_activity);
        age.num_milliseconds() >= timeout.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_version_display() {
        assert_eq!(CodeVersion::new(0, 3, 2).to_string(), "0.3.2");
    }

    #[test]
    fn staleness_uses_last_activity() {
        let now = Utc::now();
        let worker = Worker::new(
            Uuid::new_v4(),
            vec![100],
            true,
            now - chrono::Duration::seconds(600),
            1,
            CodeVersion::new(0, 1, 0),
        );
        assert!(worker.is_stale(now, Duration::from_secs(300)));
        assert!(!worker.is_stale(now, Duration::from_secs(900)));
    }

    #[test]
    fn max_concurrency_is_curve_length() {
        let worker = Worker::new(
            Uuid::new_v4(),
            vec![100, 150, 200],
            true,
            Utc::now(),
            1,
            CodeVersion::new(0, 1, 0),
        );
        assert_eq!(worker.max_concurrency(), 3);
    }
}

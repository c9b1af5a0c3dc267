//! Core data models for GridFlow

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Canonical job states reported by the scheduler adapters
///
/// The set is closed and not totally ordered; callers mostly care whether a
/// job is still in flight (see [`JobStatus::is_active`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Registered,
    Queued,
    Held,
    Active,
    Inactive,
    Submitted,
    Error,
}

impl JobStatus {
    /// Whether the job still occupies the queue or a node
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Registered
                | JobStatus::Queued
                | JobStatus::Held
                | JobStatus::Active
                | JobStatus::Submitted
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Registered => write!(f, "registered"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Held => write!(f, "held"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Inactive => write!(f, "inactive"),
            JobStatus::Submitted => write!(f, "submitted"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// One scheduler-reported job snapshot
///
/// Produced per poll and discarded after iteration; nothing is cached across
/// polls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterJob {
    id: String,
    name: String,
    status: JobStatus,
}

impl ClusterJob {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: JobStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }
}

/// Outcome of a submission request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// The backend accepted the script and assigned a job id
    Queued { job_id: String },
    /// Dry run: the script that would have been submitted, untouched backend
    Pretend { script: String },
    /// Fake backend acknowledgement
    Submitted,
}

/// Explicit submission options
///
/// Replaces the loosely-typed option bag the adapters historically accepted.
/// Resource fields drive the environment's directive header; the rest are
/// translated into scheduler flags.
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Total processor count across all operations in the script
    pub processor_count: u32,
    /// Explicit node count; normally derived from the processor count
    pub node_count: Option<u32>,
    /// Explicit processors per node; switches the header to `nodes:ppn=k` form
    pub processors_per_node: Option<u32>,
    /// Wall-clock limit
    pub walltime: Duration,
    /// Job id of a prior submission this one depends on
    pub after: Option<String>,
    /// Render only; perform no external call
    pub pretend: bool,
    /// Submit in held state (Moab only)
    pub hold: bool,
    /// Run script commands sequentially instead of backgrounding them
    pub serial: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            processor_count: 1,
            node_count: None,
            processors_per_node: None,
            walltime: Duration::hours(1),
            after: None,
            pretend: false,
            hold: false,
            serial: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Registered.to_string(), "registered");
        assert_eq!(JobStatus::Queued.to_string(), "queued");
        assert_eq!(JobStatus::Held.to_string(), "held");
        assert_eq!(JobStatus::Active.to_string(), "active");
        assert_eq!(JobStatus::Inactive.to_string(), "inactive");
        assert_eq!(JobStatus::Submitted.to_string(), "submitted");
        assert_eq!(JobStatus::Error.to_string(), "error");
    }

    #[test]
    fn test_job_status_is_active() {
        assert!(JobStatus::Queued.is_active());
        assert!(JobStatus::Active.is_active());
        assert!(JobStatus::Held.is_active());
        assert!(!JobStatus::Inactive.is_active());
        assert!(!JobStatus::Error.is_active());
    }

    #[test]
    fn test_cluster_job_accessors() {
        let job = ClusterJob::new("42.cluster", "relax-0", JobStatus::Queued);
        assert_eq!(job.id(), "42.cluster");
        assert_eq!(job.name(), "relax-0");
        assert_eq!(job.status(), JobStatus::Queued);
    }

    #[test]
    fn test_submit_options_default() {
        let options = SubmitOptions::default();
        assert_eq!(options.processor_count, 1);
        assert!(options.node_count.is_none());
        assert!(options.processors_per_node.is_none());
        assert_eq!(options.walltime, Duration::hours(1));
        assert!(!options.pretend);
        assert!(!options.hold);
        assert!(!options.serial);
    }

    #[test]
    fn test_job_status_serde() {
        let json = serde_json::to_string(&JobStatus::Queued).unwrap();
        assert_eq!(json, "\"queued\"");
        let status: JobStatus = serde_json::from_str("\"inactive\"").unwrap();
        assert_eq!(status, JobStatus::Inactive);
    }
}

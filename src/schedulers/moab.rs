//! Moab scheduler adapter
//!
//! Polls with `qstat -f -u <user>` and submits with `qsub`. Moab reports job
//! states as single-letter codes; anything outside the mapped set is treated
//! as a registered-but-unclassified job rather than an error.

use crate::error::Result;
use crate::models::{ClusterJob, JobStatus, SubmitOptions, Submission};
use crate::schedulers::{
    bare_job_id, current_user, parse_job_records, run_backend, submit_script_file, PollThrottle,
    Scheduler,
};
use tracing::{info, warn};

const QUERY_CMD: &str = "qstat";
const SUBMIT_CMD: &str = "qsub";

/// Scheduler adapter for Moab clusters
pub struct MoabScheduler {
    user: String,
    throttle: PollThrottle,
}

impl MoabScheduler {
    /// Bind to a user identity; `None` falls back to the process's user
    pub fn new(user: Option<String>) -> Self {
        Self {
            user: current_user(user),
            throttle: PollThrottle::default(),
        }
    }

    fn parse_status(state: &str) -> JobStatus {
        match state {
            "R" => JobStatus::Active,
            "Q" => JobStatus::Queued,
            "C" => JobStatus::Inactive,
            "H" => JobStatus::Held,
            other => {
                warn!("Unclassified Moab job state '{}', reporting as registered", other);
                JobStatus::Registered
            }
        }
    }

    fn collect_jobs(&self, text: &str) -> Result<Vec<ClusterJob>> {
        let mut jobs = Vec::new();
        for record in parse_job_records(text)? {
            let name = record.field("Job_Name")?.to_string();
            let status = Self::parse_status(record.field("job_state")?);
            jobs.push(ClusterJob::new(record.id, name, status));
        }
        Ok(jobs)
    }
}

impl Scheduler for MoabScheduler {
    fn jobs(&self) -> Result<Vec<ClusterJob>> {
        self.throttle.wait();
        let output = run_backend(QUERY_CMD, &["-f", "-u", &self.user])?;
        if !output.success() {
            return Err(output.into_failure());
        }
        self.collect_jobs(&output.stdout)
    }

    fn submit(&self, script: &str, options: &SubmitOptions) -> Result<Submission> {
        if options.pretend {
            return Ok(Submission::Pretend {
                script: script.to_string(),
            });
        }

        let mut args: Vec<String> = Vec::new();
        if let Some(after) = &options.after {
            args.push("-W".to_string());
            // Only predecessors that finished successfully release the
            // dependent job on Moab.
            args.push(format!("depend=\"afterok:{}\"", bare_job_id(after)));
        }
        if options.hold {
            args.push("-h".to_string());
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let job_id = submit_script_file(SUBMIT_CMD, &arg_refs, script)?;
        info!("Moab accepted job {}", job_id);
        Ok(Submission::Queued { job_id })
    }
}

//! Slurm scheduler adapter
//!
//! Clusters in this deployment front Slurm with a Torque-compatible `qstat`,
//! so polling parses the same full-format records as Moab but filters by the
//! `euser` attribute. Submission goes through `sbatch` directly. Two
//! deliberate asymmetries with the Moab adapter: dependencies use `afterany`
//! (the dependent runs once the predecessor finishes regardless of outcome),
//! and an unmapped job state is a fatal parse error instead of a fallback.

use crate::error::{GridFlowError, Result};
use crate::models::{ClusterJob, JobStatus, SubmitOptions, Submission};
use crate::schedulers::{
    bare_job_id, current_user, parse_job_records, run_backend, submit_script_file, BackendOutput,
    PollThrottle, Scheduler,
};
use tracing::{debug, info, warn};

const QUERY_CMD: &str = "qstat";
const SUBMIT_CMD: &str = "sbatch";

/// Exit code the query front-end uses for "no jobs currently queued"
const NO_JOBS_EXIT_CODE: i32 = 153;

/// Scheduler adapter for Slurm clusters
pub struct SlurmScheduler {
    user: String,
    throttle: PollThrottle,
}

impl SlurmScheduler {
    /// Bind to a user identity; `None` falls back to the process's user
    pub fn new(user: Option<String>) -> Self {
        Self {
            user: current_user(user),
            throttle: PollThrottle::default(),
        }
    }

    fn parse_status(state: &str) -> Result<JobStatus> {
        match state {
            "Q" => Ok(JobStatus::Queued),
            "R" => Ok(JobStatus::Active),
            "C" => Ok(JobStatus::Inactive),
            other => Err(GridFlowError::UnexpectedJobState(other.to_string())),
        }
    }

    /// Interpret the query front-end's exit status
    ///
    /// Exit code 153 is not an error; it reports an empty queue. Success
    /// passes the raw record text through for parsing.
    fn query_output(output: BackendOutput) -> Result<Option<String>> {
        if output.success() {
            return Ok(Some(output.stdout));
        }
        if output.code == Some(NO_JOBS_EXIT_CODE) {
            debug!("Slurm reports no jobs queued");
            return Ok(None);
        }
        Err(output.into_failure())
    }

    /// Turn query output into snapshots for the bound user
    fn collect_jobs(&self, text: &str) -> Result<Vec<ClusterJob>> {
        let mut jobs = Vec::new();
        for record in parse_job_records(text)? {
            if !record.field("euser")?.starts_with(&self.user) {
                continue;
            }
            let name = record.field("Job_Name")?.to_string();
            let status = Self::parse_status(record.field("job_state")?)?;
            jobs.push(ClusterJob::new(record.id, name, status));
        }
        Ok(jobs)
    }
}

impl Scheduler for SlurmScheduler {
    fn jobs(&self) -> Result<Vec<ClusterJob>> {
        self.throttle.wait();
        let output = run_backend(QUERY_CMD, &["-f"])?;
        match Self::query_output(output)? {
            Some(text) => self.collect_jobs(&text),
            None => Ok(Vec::new()),
        }
    }

    fn submit(&self, script: &str, options: &SubmitOptions) -> Result<Submission> {
        if options.pretend {
            return Ok(Submission::Pretend {
                script: script.to_string(),
            });
        }
        if options.hold {
            warn!("Slurm adapter ignores the hold option");
        }

        let mut args: Vec<String> = Vec::new();
        if let Some(after) = &options.after {
            args.push("-W".to_string());
            args.push(format!("depend=\"afterany:{}\"", bare_job_id(after)));
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let job_id = submit_script_file(SUBMIT_CMD, &arg_refs, script)?;
        info!("Slurm accepted job {}", job_id);
        Ok(Submission::Queued { job_id })
    }
}

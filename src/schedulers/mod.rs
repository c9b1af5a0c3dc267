//! Batch scheduler adapters
//!
//! Each adapter normalizes one backend's CLI surface into the shared
//! [`Scheduler`] contract: a per-call job snapshot and a submission entry
//! point. Adapters are stateless per call apart from the poll throttle.

pub mod fake;
pub mod moab;
pub mod slurm;

use crate::error::{GridFlowError, Result};
use crate::models::{ClusterJob, SubmitOptions, Submission};
use std::collections::HashMap;
use std::env;
use std::io::Write;
use std::process::Command;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Minimum interval between consecutive polls on one scheduler instance
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Polymorphic interface over the batch backends
pub trait Scheduler {
    /// Snapshot of the bound user's jobs; re-queries the backend every call
    fn jobs(&self) -> Result<Vec<ClusterJob>>;

    /// Submit a rendered job script
    fn submit(&self, script: &str, options: &SubmitOptions) -> Result<Submission>;
}

/// Resolve the user identity a scheduler is bound to
pub(crate) fn current_user(user: Option<String>) -> String {
    user.or_else(|| env::var("USER").ok())
        .or_else(|| env::var("USERNAME").ok())
        .unwrap_or_default()
}

/// Enforces the minimum interval between backend polls
///
/// An early poll blocks until the interval has elapsed. The timestamp sits in
/// a `Mutex` only so polling does not need `&mut self`; the guard makes no
/// cross-thread fairness promise.
#[derive(Debug)]
pub(crate) struct PollThrottle {
    min_interval: Duration,
    last_poll: Mutex<Option<Instant>>,
}

impl PollThrottle {
    pub(crate) fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_poll: Mutex::new(None),
        }
    }

    /// Block until the next poll is allowed, then record it
    pub(crate) fn wait(&self) {
        let mut last_poll = self.last_poll.lock().unwrap();
        if let Some(last) = *last_poll {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let pause = self.min_interval - elapsed;
                debug!("Throttling scheduler poll for {:?}", pause);
                std::thread::sleep(pause);
            }
        }
        *last_poll = Some(Instant::now());
    }
}

impl Default for PollThrottle {
    fn default() -> Self {
        Self::new(MIN_POLL_INTERVAL)
    }
}

/// Captured result of one backend CLI invocation
pub(crate) struct BackendOutput {
    pub(crate) code: Option<i32>,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl BackendOutput {
    pub(crate) fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Promote a non-zero exit into a command failure
    ///
    /// Covers both query and submission invocations; the message names
    /// neither.
    pub(crate) fn into_failure(self) -> GridFlowError {
        GridFlowError::CommandFailure {
            code: self.code,
            stderr: self.stderr,
        }
    }
}

/// Run a backend binary synchronously, capturing stdout/stderr/exit code
///
/// A missing binary is fatal (`BackendUnavailable`); every other outcome is
/// returned to the caller for interpretation.
pub(crate) fn run_backend(binary: &str, args: &[&str]) -> Result<BackendOutput> {
    trace!("Running backend command: {} {:?}", binary, args);
    let output = Command::new(binary).args(args).output().map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            GridFlowError::BackendUnavailable(binary.to_string())
        } else {
            GridFlowError::Io(err)
        }
    })?;

    Ok(BackendOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Write a script to a scoped temporary file and submit it
///
/// The file is removed on every exit path once the submit binary returns.
/// Trimmed stdout is the backend-assigned job id.
pub(crate) fn submit_script_file(binary: &str, args: &[&str], script: &str) -> Result<String> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(script.as_bytes())?;
    file.flush()?;

    let path = file.path().to_string_lossy().to_string();
    let mut full_args: Vec<&str> = args.to_vec();
    full_args.push(&path);

    let output = run_backend(binary, &full_args)?;
    if !output.success() {
        return Err(output.into_failure());
    }

    let job_id = output.stdout.trim().to_string();
    if job_id.is_empty() {
        return Err(GridFlowError::MalformedOutput(format!(
            "{} produced no job id",
            binary
        )));
    }
    debug!("Submitted job {}", job_id);
    Ok(job_id)
}

/// One `qstat -f` style record: a `Job Id:` line followed by `key = value`
/// attribute lines
#[derive(Debug)]
pub(crate) struct JobRecord {
    pub(crate) id: String,
    pub(crate) fields: HashMap<String, String>,
}

impl JobRecord {
    pub(crate) fn field(&self, key: &str) -> Result<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| {
                GridFlowError::MalformedOutput(format!(
                    "record for job '{}' is missing field '{}'",
                    self.id, key
                ))
            })
    }
}

/// Parse blank-line-separated job records from full-format status output
pub(crate) fn parse_job_records(text: &str) -> Result<Vec<JobRecord>> {
    let mut records = Vec::new();
    for block in text.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let mut lines = block.lines();
        let header = lines.next().unwrap_or_default();
        let id = header
            .strip_prefix("Job Id:")
            .ok_or_else(|| {
                GridFlowError::MalformedOutput(format!(
                    "expected record to start with 'Job Id:', got '{}'",
                    header
                ))
            })?
            .trim()
            .to_string();

        let mut fields = HashMap::new();
        for line in lines {
            // Attribute values may themselves contain '='; split once.
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        records.push(JobRecord { id, fields });
    }
    Ok(records)
}

/// Strip the host qualifier from a dependency job id (`42.cluster` -> `42`)
pub(crate) fn bare_job_id(job_id: &str) -> &str {
    job_id.split('.').next().unwrap_or(job_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_records() {
        let text = "Job Id: 17.cluster\n    Job_Name = relax-0\n    job_state = R\n\n\
                    Job Id: 18.cluster\n    Job_Name = relax-1\n    job_state = Q\n";
        let records = parse_job_records(text).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "17.cluster");
        assert_eq!(records[0].field("Job_Name").unwrap(), "relax-0");
        assert_eq!(records[1].field("job_state").unwrap(), "Q");
    }

    #[test]
    fn test_parse_job_records_value_with_equals() {
        let text = "Job Id: 1\n    Variable_List = PATH=/usr/bin\n";
        let records = parse_job_records(text).unwrap();
        assert_eq!(
            records[0].field("Variable_List").unwrap(),
            "PATH=/usr/bin"
        );
    }

    #[test]
    fn test_parse_job_records_bad_header() {
        let text = "NotAJob: 1\n    job_state = R\n";
        assert!(matches!(
            parse_job_records(text),
            Err(GridFlowError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_parse_job_records_empty() {
        assert!(parse_job_records("").unwrap().is_empty());
        assert!(parse_job_records("\n\n\n").unwrap().is_empty());
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let text = "Job Id: 1\n    Job_Name = x\n";
        let records = parse_job_records(text).unwrap();
        assert!(matches!(
            records[0].field("job_state"),
            Err(GridFlowError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_bare_job_id() {
        assert_eq!(bare_job_id("42.cluster.example"), "42");
        assert_eq!(bare_job_id("42"), "42");
    }

    #[test]
    fn test_run_backend_missing_binary() {
        let result = run_backend("gridflow-no-such-binary", &[]);
        assert!(matches!(
            result,
            Err(GridFlowError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_run_backend_captures_output() {
        let output = run_backend("/bin/sh", &["-c", "echo out; echo err >&2"]).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn test_submit_script_file_returns_stdout() {
        // `cat`ting the last argument echoes the script back as the "job id".
        let job_id = submit_script_file("/bin/cat", &[], "1234.cluster").unwrap();
        assert_eq!(job_id, "1234.cluster");
    }

    #[test]
    fn test_poll_throttle_blocks() {
        let throttle = PollThrottle::new(Duration::from_millis(50));
        let start = Instant::now();
        throttle.wait();
        throttle.wait();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_failure_message_is_not_submission_specific() {
        // The same error surfaces for failed polls and failed submissions.
        let output = BackendOutput {
            code: Some(2),
            stdout: String::new(),
            stderr: "qstat: cannot connect to server".to_string(),
        };
        let message = output.into_failure().to_string();
        assert!(message.contains("scheduler command failed"));
        assert!(message.contains("cannot connect to server"));
        assert!(!message.contains("submission"));
    }

    #[test]
    fn test_current_user_explicit() {
        assert_eq!(current_user(Some("alice".to_string())), "alice");
    }
}

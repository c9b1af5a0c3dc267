//! No-op scheduler backend
//!
//! Stands in when no real backend is detected on the host and whenever tests
//! request isolation. Queries yield nothing, submissions never fail and never
//! leave the process.

use crate::error::Result;
use crate::models::{ClusterJob, SubmitOptions, Submission};
use crate::schedulers::Scheduler;
use tracing::info;

/// Scheduler that accepts everything and runs nothing
#[derive(Debug, Clone, Default)]
pub struct FakeScheduler;

impl FakeScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for FakeScheduler {
    fn jobs(&self) -> Result<Vec<ClusterJob>> {
        Ok(Vec::new())
    }

    fn submit(&self, script: &str, options: &SubmitOptions) -> Result<Submission> {
        if options.pretend {
            return Ok(Submission::Pretend {
                script: script.to_string(),
            });
        }
        info!("Fake submission (np={})", options.processor_count);
        for line in script.lines() {
            info!("# {}", line);
        }
        Ok(Submission::Submitted)
    }
}

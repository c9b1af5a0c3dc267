//! Compute environments: binding schedulers to detected clusters
//!
//! An environment owns everything cluster-specific about a submission: which
//! scheduler variant to talk to, how many cores a node offers per execution
//! mode, and the dialect of the resource-directive header. Detection walks an
//! explicit, ordered table of hostname patterns populated once at process
//! start.

use crate::error::{GridFlowError, Result};
use crate::models::{SubmitOptions, Submission};
use crate::schedulers::fake::FakeScheduler;
use crate::schedulers::moab::MoabScheduler;
use crate::schedulers::slurm::SlurmScheduler;
use crate::schedulers::Scheduler;
use chrono::Duration;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use tracing::{debug, warn};

/// Execution mode a node allocation is sized for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Cpu,
    Gpu,
}

/// Scheduler variant an environment is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    Moab,
    Slurm,
    Fake,
}

/// Format a wall-clock limit as `HH:MM:SS`; hours may exceed 24
pub fn format_walltime(walltime: Duration) -> String {
    let total_seconds = walltime.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:0>2}:{:02}:{:02}", hours, minutes, seconds)
}

/// Line-oriented submission script buffer
///
/// The environment writes the resource header, the caller appends one command
/// per operation, and finishing the script appends the `wait` barrier so the
/// script does not exit while backgrounded commands are still running.
#[derive(Debug, Clone)]
pub struct JobScript {
    buffer: String,
    serial: bool,
}

impl JobScript {
    fn new(serial: bool) -> Self {
        Self {
            buffer: String::new(),
            serial,
        }
    }

    pub fn writeline(&mut self, line: &str) {
        self.buffer.push_str(line);
        self.buffer.push('\n');
    }

    /// Append a command, MPI-wrapped when `np > 1` and backgrounded unless
    /// the script runs in serial mode
    pub fn write_cmd(&mut self, cmd: &str, np: u32) {
        let mut line = if np > 1 {
            format!("mpirun -np {} {}", np, cmd)
        } else {
            cmd.to_string()
        };
        if !self.serial {
            line.push_str(" &");
        }
        self.writeline(&line);
    }

    /// Terminate the script with the blocking `wait` barrier
    pub fn finish(mut self) -> String {
        self.writeline("wait");
        self.buffer
    }
}

/// A scheduler variant bound to a cluster, with its per-node core counts
#[derive(Debug, Clone)]
pub struct ComputeEnvironment {
    name: String,
    scheduler: Option<SchedulerKind>,
    mode: Mode,
    cores_per_node: HashMap<Mode, u32>,
}

impl ComputeEnvironment {
    pub fn new(
        name: impl Into<String>,
        scheduler: Option<SchedulerKind>,
        mode: Mode,
        cores_per_node: HashMap<Mode, u32>,
    ) -> Self {
        Self {
            name: name.into(),
            scheduler,
            mode,
            cores_per_node,
        }
    }

    /// Fake-backed environment used when tests request isolation
    pub fn test_environment() -> Self {
        Self::new(
            "test",
            Some(SchedulerKind::Fake),
            Mode::Cpu,
            HashMap::from([(Mode::Cpu, 8), (Mode::Gpu, 8)]),
        )
    }

    /// Fallback for hosts no registered pattern matches
    pub fn unknown() -> Self {
        Self::new(
            "unknown",
            Some(SchedulerKind::Fake),
            Mode::Cpu,
            HashMap::from([(Mode::Cpu, 1)]),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scheduler_kind(&self) -> Option<SchedulerKind> {
        self.scheduler
    }

    /// Instantiate the bound scheduler
    pub fn scheduler(&self) -> Result<Box<dyn Scheduler>> {
        match self.scheduler {
            Some(SchedulerKind::Moab) => Ok(Box::new(MoabScheduler::new(None))),
            Some(SchedulerKind::Slurm) => Ok(Box::new(SlurmScheduler::new(None))),
            Some(SchedulerKind::Fake) => Ok(Box::new(FakeScheduler::new())),
            None => Err(GridFlowError::NoScheduler(self.name.clone())),
        }
    }

    fn cores_per_node(&self) -> u32 {
        self.cores_per_node.get(&self.mode).copied().unwrap_or(1)
    }

    /// Node count and utilization for a submission request
    ///
    /// With an explicit per-node processor count the node count is
    /// `ceil(np / ppn)`, otherwise `ceil(np / cores-per-node)`; an explicit
    /// node count overrides both (bundled jobs). Utilization is always
    /// measured against what the nodes physically offer, so requesting fewer
    /// processors per node than a node has counts against it.
    pub fn node_allocation(&self, options: &SubmitOptions) -> (u32, f64) {
        let np = options.processor_count.max(1);
        let per_node = options
            .processors_per_node
            .unwrap_or_else(|| self.cores_per_node())
            .max(1);
        let nodes = options
            .node_count
            .unwrap_or_else(|| np.div_ceil(per_node))
            .max(1);
        let utilization = f64::from(np) / f64::from(nodes * self.cores_per_node().max(1));
        (nodes, utilization)
    }

    /// Start a submission script with this environment's resource header
    ///
    /// Poor node utilization is worth a warning but never blocks submission.
    pub fn script(&self, job_id: &str, options: &SubmitOptions) -> JobScript {
        let (nodes, utilization) = self.node_allocation(options);
        if utilization < 0.9 {
            warn!(
                "Bad node utilization ({:.1}%) for job '{}'",
                utilization * 100.0,
                job_id
            );
        }

        let walltime = format_walltime(options.walltime);
        let np = options.processor_count.max(1);
        let mut script = JobScript::new(options.serial);
        script.writeline("#!/bin/bash");
        match self.scheduler {
            Some(SchedulerKind::Moab) => {
                // ppn is a node feature on Moab, so an explicit value moves
                // into the nodes directive itself.
                let proc_spec = match options.processors_per_node {
                    Some(ppn) => format!("{}:ppn={}", nodes, ppn),
                    None => np.to_string(),
                };
                script.writeline(&format!("#PBS -N {}", job_id));
                script.writeline(&format!("#PBS -l nodes={}", proc_spec));
                script.writeline(&format!("#PBS -l walltime={}", walltime));
            }
            Some(SchedulerKind::Slurm) => {
                script.writeline(&format!("#SBATCH --job-name={}", job_id));
                script.writeline(&format!("#SBATCH --nodes={}", nodes));
                script.writeline(&format!("#SBATCH --ntasks={}", np));
                if let Some(ppn) = options.processors_per_node {
                    script.writeline(&format!("#SBATCH --ntasks-per-node={}", ppn));
                }
                script.writeline(&format!("#SBATCH --time={}", walltime));
            }
            Some(SchedulerKind::Fake) | None => {
                script.writeline(&format!("# gridflow job {}", job_id));
                script.writeline(&format!(
                    "# nodes={} np={} walltime={}",
                    nodes, np, walltime
                ));
            }
        }
        script.writeline("");
        script
    }

    /// Finalize the script and hand it to the bound scheduler
    pub fn submit(&self, script: JobScript, options: &SubmitOptions) -> Result<Submission> {
        let scheduler = self.scheduler()?;
        scheduler.submit(&script.finish(), options)
    }
}

type EnvironmentFactory = fn() -> ComputeEnvironment;

struct RegistryEntry {
    pattern: Regex,
    factory: EnvironmentFactory,
}

fn registry() -> &'static Mutex<Vec<RegistryEntry>> {
    static REGISTRY: OnceLock<Mutex<Vec<RegistryEntry>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Append an entry to the process-wide detection table
///
/// Call once per environment at process start; entries are consulted in
/// registration order.
pub fn register_environment(hostname_pattern: &str, factory: EnvironmentFactory) -> Result<()> {
    let pattern = Regex::new(hostname_pattern)?;
    registry().lock().unwrap().push(RegistryEntry { pattern, factory });
    Ok(())
}

/// First registered environment whose pattern matches the hostname
pub fn detect_environment(host: &str) -> ComputeEnvironment {
    let entries = registry().lock().unwrap();
    for entry in entries.iter() {
        if entry.pattern.is_match(host) {
            let environment = (entry.factory)();
            debug!("Detected environment '{}' on {}", environment.name(), host);
            return environment;
        }
    }
    debug!("No environment registered for host {}", host);
    ComputeEnvironment::unknown()
}

/// Environment for the current process
///
/// `test = true` short-circuits detection and returns the fake-backed test
/// environment unconditionally.
pub fn get_environment(test: bool) -> ComputeEnvironment {
    if test {
        return ComputeEnvironment::test_environment();
    }
    let host = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    detect_environment(&host)
}

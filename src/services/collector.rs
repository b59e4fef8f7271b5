use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::{ProcessState, RawProcessSample};
use crate::services::inventory::CgroupInventory;
use crate::services::procfs::ProcReader;
use crate::state::AppState;
use crate::tracker::{Ingest, JobRegistry};

/// Name of the scheduler's per-job helper process, never part of a job.
const SCHEDULER_HELPER: &str = "res";

/// Processes per scheduling state, over all jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub running: u64,
    pub sleeping: u64,
    pub blocked: u64,
    pub zombies: u64,
    pub stopped: u64,
    pub paging: u64,
}

impl StateCounts {
    pub fn add(&mut self, state: ProcessState) {
        match state {
            ProcessState::Running => self.running += 1,
            ProcessState::Sleeping => self.sleeping += 1,
            ProcessState::Blocked => self.blocked += 1,
            ProcessState::Zombie => self.zombies += 1,
            ProcessState::Stopped => self.stopped += 1,
            ProcessState::Paging => self.paging += 1,
            ProcessState::Other => {}
        }
    }

    pub fn by_label(&self) -> [(&'static str, u64); 6] {
        [
            (ProcessState::Running.label(), self.running),
            (ProcessState::Sleeping.label(), self.sleeping),
            (ProcessState::Blocked.label(), self.blocked),
            (ProcessState::Zombie.label(), self.zombies),
            (ProcessState::Stopped.label(), self.stopped),
            (ProcessState::Paging.label(), self.paging),
        ]
    }
}

/// Host-wide values gathered alongside the job samples.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostStats {
    pub states: StateCounts,
    /// Forks since boot
    pub forks: Option<u64>,
    /// Unix time of the last completed cycle
    pub last_cycle: Option<u64>,
}

/// One process sample attributed to a job.
#[derive(Debug, Clone)]
pub struct JobSample {
    pub job_id: String,
    /// Process name, which together with the job id identifies a job record
    pub job_name: String,
    pub cmdline: Option<String>,
    pub sample: RawProcessSample,
}

/// Everything read from the system for one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleInput {
    pub samples: Vec<JobSample>,
    pub finished: Vec<String>,
    /// Job ids present in the inventory. When set, tracked jobs missing from
    /// it are removed as well.
    pub seen: Option<HashSet<String>>,
    pub host: HostStats,
}

/// Outcome of applying one cycle to the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub recorded: usize,
    pub new_jobs: usize,
    pub dropped: usize,
    pub removed_jobs: usize,
    pub evicted: usize,
}

/// Whether a process reported by the inventory should be sampled.
pub fn is_job_process(name: &str) -> bool {
    !name.is_empty()
        && name != SCHEDULER_HELPER
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

pub struct Collector {
    procfs: ProcReader,
    inventory: CgroupInventory,
}

impl Collector {
    pub fn new(proc_root: impl Into<PathBuf>, cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            procfs: ProcReader::new(proc_root),
            inventory: CgroupInventory::new(cgroup_root),
        }
    }

    /// Reads the inventory and one sample per job process. Nothing here
    /// touches the registry.
    pub fn gather(&self) -> Result<CycleInput> {
        let inventory = self.inventory.scan()?;
        let mut input = CycleInput {
            finished: inventory.finished,
            seen: Some(inventory.seen),
            ..CycleInput::default()
        };

        for (job_id, pids) in inventory.active {
            for pid in pids {
                if self.procfs.is_thread(pid) {
                    continue;
                }
                let sample = match self.procfs.read_sample(pid) {
                    Ok(s) => s,
                    Err(e) => {
                        log::debug!("job {}: skipping pid {}: {:#}", job_id, pid, e);
                        continue;
                    }
                };
                if !is_job_process(&sample.name) {
                    continue;
                }

                input.host.states.add(sample.state);
                input.samples.push(JobSample {
                    job_id: job_id.clone(),
                    job_name: sample.name.clone(),
                    cmdline: self.procfs.read_cmdline(pid, &sample.name),
                    sample,
                });
            }
        }

        match self.procfs.read_fork_count() {
            Ok(forks) => input.host.forks = Some(forks),
            Err(e) => log::debug!("fork counter unavailable: {:#}", e),
        }

        Ok(input)
    }

    /// Runs one full cycle: the lock is held from `begin_cycle` to
    /// `end_cycle`, never while reading the system.
    pub fn run_cycle(&self, state: &AppState) -> Result<CycleReport> {
        let input = self.gather()?;

        let mut guard = state
            .lock()
            .map_err(|_| anyhow!("application state lock poisoned"))?;
        let report = apply_cycle(&mut guard.registry, &input);

        let mut host = input.host;
        host.last_cycle = Some(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        );
        guard.host = host;

        Ok(report)
    }
}

/// Feeds one cycle's input through the registry protocol.
pub fn apply_cycle(registry: &mut JobRegistry, input: &CycleInput) -> CycleReport {
    let mut report = CycleReport::default();

    registry.begin_cycle();
    report.cycle = registry.cycle();

    for s in &input.samples {
        match registry.ingest_sample(&s.job_id, &s.job_name, s.cmdline.as_deref(), &s.sample) {
            Ingest::Recorded => report.recorded += 1,
            Ingest::NewJob => {
                report.recorded += 1;
                report.new_jobs += 1;
            }
            Ingest::Dropped => report.dropped += 1,
            Ingest::Ignored => {}
        }
    }

    for job_id in &input.finished {
        if registry.remove_job(job_id) {
            report.removed_jobs += 1;
        }
    }

    if let Some(seen) = &input.seen {
        let vanished: Vec<String> = registry
            .literal_job_ids()
            .filter(|id| !seen.contains(*id))
            .map(str::to_string)
            .collect();
        for job_id in vanished {
            log::debug!("job {} has no cgroup directory any more", job_id);
            if registry.remove_job(&job_id) {
                report.removed_jobs += 1;
            }
        }
    }

    report.evicted = registry.end_cycle();
    report
}

use regex::Regex;
use std::collections::TryReserveError;

use crate::models::{RawProcessSample, Usage};
use crate::tracker::job::{JobRecord, Matcher};

/// Cycles a process may go without a sample before it is evicted.
pub const DEFAULT_MAX_AGE: u64 = 10;

/// Where the registry stands within a collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Accumulating,
    Aged,
}

/// What happened to a sample handed to [`JobRegistry::ingest_sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Folded into an existing job
    Recorded,
    /// A new job record was created for it
    NewJob,
    /// Placeholder pid 0, ignored
    Ignored,
    /// No room for a new record; the registry is unchanged
    Dropped,
}

/// All tracked jobs, in creation order.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: Vec<JobRecord>,
    cycle: u64,
    max_age: u64,
    phase: CyclePhase,
    /// Makes room for one more job record
    reserve_job: fn(&mut Vec<JobRecord>) -> Result<(), TryReserveError>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_max_age(DEFAULT_MAX_AGE)
    }

    pub fn with_max_age(max_age: u64) -> Self {
        Self {
            jobs: Vec::new(),
            cycle: 0,
            max_age,
            phase: CyclePhase::Idle,
            reserve_job: |jobs| jobs.try_reserve(1),
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Number of cycles started so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// First job whose id equals `job_id`.
    pub fn job(&self, job_id: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.job_id() == job_id)
    }

    /// Ids of the jobs created from samples, in registry order. Pattern jobs
    /// are configured rather than discovered and are left out.
    pub fn literal_job_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.jobs
            .iter()
            .filter(|j| j.matcher().pattern_source().is_none())
            .map(|j| j.job_id())
    }

    /// Adds a job that claims every sample whose command line matches `regex`.
    pub fn register_pattern(&mut self, job_id: &str, job_name: &str, regex: Regex) {
        log::info!("job {} ({}): matching command lines against '{}'", job_id, job_name, regex);
        self.jobs
            .push(JobRecord::new(Matcher::pattern(job_id, job_name, regex)));
    }

    /// Starts a cycle: every job aggregate is cleared, whatever state the
    /// previous cycle was left in.
    pub fn begin_cycle(&mut self) {
        if self.phase == CyclePhase::Accumulating {
            log::warn!("cycle {} never ended, starting a new one", self.cycle);
        }
        self.cycle += 1;
        for job in &mut self.jobs {
            job.clear_totals();
        }
        self.phase = CyclePhase::Accumulating;
    }

    /// Attributes one process sample to its job, creating the job and the
    /// process record as needed. The first matching job in registry order
    /// wins.
    pub fn ingest_sample(
        &mut self,
        job_id: &str,
        job_name: &str,
        cmdline: Option<&str>,
        sample: &RawProcessSample,
    ) -> Ingest {
        if sample.pid == 0 {
            return Ingest::Ignored;
        }
        if self.phase != CyclePhase::Accumulating {
            log::debug!("sample for pid {} outside of an open cycle", sample.pid);
        }

        let (index, outcome) = match self
            .jobs
            .iter()
            .position(|j| j.matches(job_id, job_name, cmdline))
        {
            Some(i) => (i, Ingest::Recorded),
            None => {
                if let Err(e) = (self.reserve_job)(&mut self.jobs) {
                    log::warn!("dropping sample for job {} pid {}: {}", job_id, sample.pid, e);
                    return Ingest::Dropped;
                }
                log::debug!("tracking new job {} ({})", job_id, job_name);
                self.jobs
                    .push(JobRecord::new(Matcher::literal(job_id, job_name)));
                (self.jobs.len() - 1, Ingest::NewJob)
            }
        };

        if let Err(e) = self.jobs[index].ingest(sample, self.cycle) {
            log::warn!("dropping sample for job {} pid {}: {}", job_id, sample.pid, e);
            return Ingest::Dropped;
        }
        outcome
    }

    /// Forgets the first job with this id and all its processes.
    /// Returns whether anything was removed.
    pub fn remove_job(&mut self, job_id: &str) -> bool {
        match self.jobs.iter().position(|j| j.job_id() == job_id) {
            Some(i) => {
                let job = self.jobs.remove(i);
                log::debug!(
                    "removed job {} ({}) with {} processes",
                    job_id,
                    job.job_name(),
                    job.process_count()
                );
                true
            }
            None => false,
        }
    }

    /// Ages processes that got no sample this cycle, evicts the stale ones
    /// and rebuilds every job aggregate. Returns the number of evictions.
    pub fn end_cycle(&mut self) -> usize {
        let (cycle, max_age) = (self.cycle, self.max_age);
        let evicted: usize = self
            .jobs
            .iter_mut()
            .map(|job| job.age_and_rebuild(cycle, max_age))
            .sum();
        self.phase = CyclePhase::Aged;
        evicted
    }

    /// Current aggregates, in registry order. Call again to restart.
    pub fn snapshot(&self) -> impl Iterator<Item = JobView<'_>> + Clone + '_ {
        self.jobs.iter().map(JobView::new)
    }
}

/// Read-only view of one job for emission.
#[derive(Debug, Clone, Copy)]
pub struct JobView<'a> {
    record: &'a JobRecord,
}

/// Per-process values within a [`JobView`].
#[derive(Debug, Clone)]
pub struct ProcessView {
    pub pid: u32,
    pub age: u64,
    pub usage: Usage,
}

impl<'a> JobView<'a> {
    fn new(record: &'a JobRecord) -> Self {
        Self { record }
    }

    pub fn job_id(&self) -> &'a str {
        self.record.job_id()
    }

    pub fn job_name(&self) -> &'a str {
        self.record.job_name()
    }

    pub fn pattern(&self) -> Option<&'a str> {
        self.record.matcher().pattern_source()
    }

    pub fn totals(&self) -> &'a Usage {
        self.record.totals()
    }

    pub fn processes(&self) -> impl Iterator<Item = ProcessView> + 'a {
        self.record.processes().into_iter().map(|p| ProcessView {
            pid: p.pid(),
            age: p.age(),
            usage: p.usage(),
        })
    }
}

use regex::Regex;
use std::collections::hash_map::{Entry, HashMap};
use std::collections::TryReserveError;

use crate::models::{RawProcessSample, Usage};
use crate::tracker::process::ProcessRecord;

/// How a job record recognises the samples that belong to it.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact job id and job name
    Literal { job_id: String, job_name: String },
    /// Regular expression tested against the command line, or the job id
    /// when no command line is known
    Pattern {
        job_id: String,
        job_name: String,
        regex: Regex,
    },
}

impl Matcher {
    pub fn literal(job_id: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self::Literal {
            job_id: job_id.into(),
            job_name: job_name.into(),
        }
    }

    pub fn pattern(job_id: impl Into<String>, job_name: impl Into<String>, regex: Regex) -> Self {
        Self::Pattern {
            job_id: job_id.into(),
            job_name: job_name.into(),
            regex,
        }
    }

    pub fn matches(&self, job_id: &str, job_name: &str, cmdline: Option<&str>) -> bool {
        match self {
            Self::Pattern { regex, .. } => {
                let subject = match cmdline {
                    Some(c) if !c.is_empty() => c,
                    _ => job_id,
                };
                regex.is_match(subject)
            }
            Self::Literal {
                job_id: id,
                job_name: name,
            } => id == job_id && name == job_name,
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            Self::Literal { job_id, .. } | Self::Pattern { job_id, .. } => job_id,
        }
    }

    pub fn job_name(&self) -> &str {
        match self {
            Self::Literal { job_name, .. } | Self::Pattern { job_name, .. } => job_name,
        }
    }

    /// Source of the pattern, `None` for literal matchers.
    pub fn pattern_source(&self) -> Option<&str> {
        match self {
            Self::Pattern { regex, .. } => Some(regex.as_str()),
            Self::Literal { .. } => None,
        }
    }
}

/// A job and the processes currently attributed to it.
#[derive(Debug)]
pub struct JobRecord {
    matcher: Matcher,
    processes: HashMap<u32, ProcessRecord>,
    totals: Usage,
}

impl JobRecord {
    pub fn new(matcher: Matcher) -> Self {
        Self {
            matcher,
            processes: HashMap::new(),
            totals: Usage::empty(),
        }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn job_id(&self) -> &str {
        self.matcher.job_id()
    }

    pub fn job_name(&self) -> &str {
        self.matcher.job_name()
    }

    pub fn matches(&self, job_id: &str, job_name: &str, cmdline: Option<&str>) -> bool {
        self.matcher.matches(job_id, job_name, cmdline)
    }

    /// Aggregate of the processes ingested so far in the current cycle. After
    /// `age_and_rebuild` it covers every process still held, aged ones included.
    pub fn totals(&self) -> &Usage {
        &self.totals
    }

    #[cfg(test)]
    pub fn process(&self, pid: u32) -> Option<&ProcessRecord> {
        self.processes.get(&pid)
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    /// Processes ordered by pid.
    pub fn processes(&self) -> Vec<&ProcessRecord> {
        let mut list: Vec<_> = self.processes.values().collect();
        list.sort_by_key(|p| p.pid());
        list
    }

    /// Drops last cycle's aggregate; optional fields become unavailable.
    pub fn clear_totals(&mut self) {
        self.totals = Usage::empty();
    }

    /// Refreshes (or creates) the record for `sample.pid` and folds it into
    /// the running aggregate of the current cycle.
    pub fn ingest(&mut self, sample: &RawProcessSample, cycle: u64) -> Result<(), TryReserveError> {
        if !self.processes.contains_key(&sample.pid) {
            self.processes.try_reserve(1)?;
        }
        let record = match self.processes.entry(sample.pid) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                log::debug!(
                    "job {} ({}): tracking new pid {}",
                    self.matcher.job_id(),
                    self.matcher.job_name(),
                    sample.pid
                );
                e.insert(ProcessRecord::new(sample.pid))
            }
        };
        record.ingest(sample, cycle);
        self.totals.absorb(&record.usage());
        Ok(())
    }

    /// Ages every process not refreshed during `cycle`, evicts those older
    /// than `max_age`, then rebuilds the aggregate from what remains.
    ///
    /// Returns the number of evicted processes.
    pub fn age_and_rebuild(&mut self, cycle: u64, max_age: u64) -> usize {
        let before = self.processes.len();
        let job_id = self.matcher.job_id();

        self.processes.retain(|pid, rec| {
            if rec.last_seen() == cycle {
                return true;
            }
            let age = rec.grow_older();
            if age > max_age {
                log::debug!(
                    "job {}: evicting pid {} after {} cycles without a sample",
                    job_id,
                    pid,
                    age
                );
                return false;
            }
            true
        });

        let mut totals = Usage::empty();
        for rec in self.processes.values() {
            totals.absorb(&rec.usage());
        }
        self.totals = totals;

        before - self.processes.len()
    }
}

//! Job inventory from the batch scheduler's cgroup tree.
//!
//! Each job owns a directory named `job.<id>.<suffix>` (or `job.<id>[...]`)
//! holding a `tasks` file with one pid per line. An empty `tasks` file means
//! the job has finished, and so does a directory that has disappeared.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

/// Jobs seen in one scan of the cgroup tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    /// Running jobs with their pids
    pub active: Vec<(String, Vec<u32>)>,
    /// Jobs whose process list is empty
    pub finished: Vec<String>,
    /// Every job id with a directory, running or finished
    pub seen: HashSet<String>,
}

/// Extracts the job id from a cgroup directory name: the text after the first
/// `.` up to the next `.` or `[`.
pub fn parse_job_id(dir_name: &str) -> Option<&str> {
    let (_, rest) = dir_name.split_once('.')?;
    let end = rest.find(['.', '[']).unwrap_or(rest.len());
    let id = &rest[..end];
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Pids listed in a `tasks` file; unparsable lines are skipped.
pub fn parse_tasks(content: &str) -> Vec<u32> {
    content
        .lines()
        .filter_map(|l| l.trim().parse::<u32>().ok())
        .collect()
}

#[derive(Debug, Clone)]
pub struct CgroupInventory {
    root: PathBuf,
}

impl CgroupInventory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Lists every job directory under the root, sorted by job id.
    ///
    /// An unreadable root or `tasks` file fails the whole scan: a partial
    /// inventory would make live jobs look finished.
    pub fn scan(&self) -> Result<Inventory> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("cannot open job cgroup root {}", self.root.display()))?;

        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("listing {}", self.root.display()))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let dir_name = entry.file_name();
            let Some(job_id) = dir_name.to_str().and_then(parse_job_id) else {
                log::debug!("skipping cgroup entry {:?}", dir_name);
                continue;
            };

            let tasks_path = entry.path().join("tasks");
            let content = fs::read_to_string(&tasks_path)
                .with_context(|| format!("could not read {}", tasks_path.display()))?;
            jobs.push((job_id.to_string(), parse_tasks(&content)));
        }
        jobs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut inventory = Inventory::default();
        for (job_id, pids) in jobs {
            inventory.seen.insert(job_id.clone());
            if pids.is_empty() {
                inventory.finished.push(job_id);
            } else {
                inventory.active.push((job_id, pids));
            }
        }
        Ok(inventory)
    }
}

//! Per-process samples read from a `/proc`-style tree.

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{ProcessState, RawProcessSample};

fn sysconf(name: libc::c_int, fallback: u64) -> u64 {
    // SAFETY: sysconf has no preconditions; failures are reported as -1
    let value = unsafe { libc::sysconf(name) };
    if value > 0 {
        value as u64
    } else {
        fallback
    }
}

lazy_static! {
    /// Clock ticks per second, the unit of cpu counters in `/proc/<pid>/stat`.
    pub static ref CLK_TCK: u64 = sysconf(libc::_SC_CLK_TCK, 100);
    /// Page size, the unit of the rss field in `/proc/<pid>/stat`.
    pub static ref PAGE_SIZE: u64 = sysconf(libc::_SC_PAGESIZE, 4096);
}

/// Fields of `/proc/<pid>/stat` this exporter uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFields {
    pub name: String,
    pub state: ProcessState,
    pub minor_faults: Option<u64>,
    pub major_faults: Option<u64>,
    pub utime: Option<u64>,
    pub stime: Option<u64>,
    pub vsize: u64,
    /// Resident pages
    pub rss_pages: u64,
    pub stack_size: u64,
}

/// Parses the content of a `stat` file.
///
/// The process name sits between the first `(` and the last `)` and may
/// itself contain spaces or parentheses.
pub fn parse_stat(content: &str) -> Result<StatFields> {
    let start = content.find('(').ok_or_else(|| anyhow!("no '(' in stat"))?;
    let end = content.rfind(')').ok_or_else(|| anyhow!("no ')' in stat"))?;
    if start >= end {
        return Err(anyhow!("malformed process name in stat"));
    }
    let name = content[start + 1..end].to_string();

    let fields: Vec<&str> = content[end + 1..].split_whitespace().collect();
    if fields.len() < 22 {
        return Err(anyhow!("stat has only {} fields", fields.len()));
    }

    let num = |i: usize| fields.get(i).and_then(|f| f.parse::<u64>().ok());

    let stack_size = match (num(25), num(26)) {
        (Some(start), Some(ptr)) => start.abs_diff(ptr),
        _ => 0,
    };

    Ok(StatFields {
        name,
        state: ProcessState::from_letter(fields[0].chars().next().unwrap_or('?')),
        minor_faults: num(7),
        major_faults: num(9),
        utime: num(11),
        stime: num(12),
        vsize: num(20).unwrap_or(0),
        rss_pages: num(21).unwrap_or(0),
        stack_size,
    })
}

/// Values taken from a `status` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFields {
    pub tgid: Option<u32>,
    pub vmem_data: Option<u64>,
    pub vmem_code: Option<u64>,
    pub voluntary_ctx_switches: Option<u64>,
    pub involuntary_ctx_switches: Option<u64>,
}

pub fn parse_status(content: &str) -> StatusFields {
    let mut out = StatusFields::default();
    let mut data_kb = None;
    let mut exe_kb = None;
    let mut lib_kb = None;

    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value = rest.split_whitespace().next().and_then(|v| v.parse::<u64>().ok());
        match key {
            "Tgid" => out.tgid = value.and_then(|v| u32::try_from(v).ok()),
            "VmData" => data_kb = value,
            "VmExe" => exe_kb = value,
            "VmLib" => lib_kb = value,
            "voluntary_ctxt_switches" => out.voluntary_ctx_switches = value,
            "nonvoluntary_ctxt_switches" => out.involuntary_ctx_switches = value,
            _ => {}
        }
    }

    // Kernel threads have no Vm* lines at all
    if data_kb.is_some() || exe_kb.is_some() || lib_kb.is_some() {
        out.vmem_data = Some(data_kb.unwrap_or(0) * 1024);
        out.vmem_code = Some((exe_kb.unwrap_or(0) + lib_kb.unwrap_or(0)) * 1024);
    }
    out
}

/// I/O counters from an `io` file: rchar, wchar, syscr, syscw.
pub fn parse_io(content: &str) -> [Option<u64>; 4] {
    let mut out = [None; 4];
    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let slot = match key.trim() {
            "rchar" => 0,
            "wchar" => 1,
            "syscr" => 2,
            "syscw" => 3,
            _ => continue,
        };
        out[slot] = rest.trim().parse::<u64>().ok();
    }
    out
}

/// Reads samples from a proc filesystem mounted at `root`.
#[derive(Debug, Clone)]
pub struct ProcReader {
    root: PathBuf,
    page_size: u64,
}

impl ProcReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: *PAGE_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    fn pid_dir(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string())
    }

    /// Takes one sample of `pid`. Fails only when `stat` itself is missing
    /// or unreadable, which usually means the process has exited.
    pub fn read_sample(&self, pid: u32) -> Result<RawProcessSample> {
        let dir = self.pid_dir(pid);
        let stat_path = dir.join("stat");
        let content = fs::read_to_string(&stat_path)
            .with_context(|| format!("reading {}", stat_path.display()))?;
        let stat = parse_stat(&content)
            .with_context(|| format!("parsing {}", stat_path.display()))?;

        let mut sample = RawProcessSample::new(pid, stat.name.clone());
        sample.state = stat.state;

        if stat.state == ProcessState::Zombie {
            sample.num_proc = 0;
            sample.num_lwp = 0;
            return Ok(sample);
        }

        sample.num_lwp = count_tasks(&dir);
        sample.cpu_user_ticks = stat.utime;
        sample.cpu_system_ticks = stat.stime;
        sample.minor_faults = stat.minor_faults;
        sample.major_faults = stat.major_faults;
        sample.vmem_size = stat.vsize;
        sample.vmem_rss = stat.rss_pages * self.page_size;
        sample.stack_size = stat.stack_size;

        match fs::read_to_string(dir.join("status")) {
            Ok(s) => {
                let status = parse_status(&s);
                sample.vmem_data = status.vmem_data;
                sample.vmem_code = status.vmem_code;
                sample.voluntary_ctx_switches = status.voluntary_ctx_switches;
                sample.involuntary_ctx_switches = status.involuntary_ctx_switches;
            }
            Err(e) => log::debug!("pid {}: no status data: {}", pid, e),
        }

        match fs::read_to_string(dir.join("io")) {
            Ok(s) => {
                let [rchar, wchar, syscr, syscw] = parse_io(&s);
                sample.io_read_bytes = rchar;
                sample.io_write_bytes = wchar;
                sample.io_read_ops = syscr;
                sample.io_write_ops = syscw;
            }
            Err(e) => log::debug!("pid {}: no io data: {}", pid, e),
        }

        Ok(sample)
    }

    /// Command line with arguments joined by spaces; `[name]` when the
    /// kernel reports none (kernel threads, zombies).
    pub fn read_cmdline(&self, pid: u32, name: &str) -> Option<String> {
        let raw = match fs::read(self.pid_dir(pid).join("cmdline")) {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("pid {}: failed to read cmdline: {}", pid, e);
                }
                return None;
            }
        };

        if raw.is_empty() {
            return Some(format!("[{}]", name));
        }
        let joined: String = String::from_utf8_lossy(&raw)
            .chars()
            .map(|c| if c == '\0' { ' ' } else { c })
            .collect();
        Some(joined.trim_end().to_string())
    }

    /// Whether `pid` is a thread of another process rather than a thread
    /// group leader.
    pub fn is_thread(&self, pid: u32) -> bool {
        fs::read_to_string(self.pid_dir(pid).join("status"))
            .ok()
            .and_then(|s| parse_status(&s).tgid)
            .is_some_and(|tgid| tgid != pid)
    }

    /// Total forks since boot, from the `processes` line of `stat`.
    pub fn read_fork_count(&self) -> Result<u64> {
        let path = self.root.join("stat");
        let content =
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        content
            .lines()
            .find_map(|line| {
                let mut parts = line.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some("processes"), Some(v), None) => v.parse::<u64>().ok(),
                    _ => None,
                }
            })
            .ok_or_else(|| anyhow!("no 'processes' line in {}", path.display()))
    }
}

/// Threads of a process; 1 when the task directory is unavailable.
fn count_tasks(pid_dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(pid_dir.join("task")) else {
        return 1;
    };
    let count = entries
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(|c: char| c.is_ascii_digit()))
        })
        .count() as u64;
    count.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const STAT: &str = "1234 (sim (mpi)) S 1 1234 1234 0 -1 4194304 100 0 7 0 1000 500 0 0 20 0 3 0 12345 12345678 300 18446744073709551615 4194304 4238788 140736466511168 140736466510000 0 0 0 0 0 0 0 0 17 1 0 0 0 0 0";

    const STATUS: &str = "Name:\tsim\nState:\tS (sleeping)\nTgid:\t1234\nPid:\t1234\nVmData:\t    2048 kB\nVmExe:\t     100 kB\nVmLib:\t     400 kB\nvoluntary_ctxt_switches:\t55\nnonvoluntary_ctxt_switches:\t3\n";

    const IO: &str = "rchar: 4000\nwchar: 1000\nsyscr: 40\nsyscw: 10\nread_bytes: 0\nwrite_bytes: 0\n";

    fn write_proc(root: &Path, pid: u32, stat: &str) -> PathBuf {
        let dir = root.join(pid.to_string());
        std::fs::create_dir_all(dir.join("task/1234")).unwrap();
        std::fs::create_dir_all(dir.join("task/1235")).unwrap();
        std::fs::write(dir.join("stat"), stat).unwrap();
        std::fs::write(dir.join("status"), STATUS).unwrap();
        std::fs::write(dir.join("io"), IO).unwrap();
        std::fs::write(dir.join("cmdline"), b"/usr/bin/sim\0--steps\0100\0").unwrap();
        dir
    }

    #[test]
    fn test_parse_stat() {
        let stat = parse_stat(STAT).unwrap();
        assert_eq!(stat.name, "sim (mpi)");
        assert_eq!(stat.state, ProcessState::Sleeping);
        assert_eq!(stat.minor_faults, Some(100));
        assert_eq!(stat.major_faults, Some(7));
        assert_eq!(stat.utime, Some(1000));
        assert_eq!(stat.stime, Some(500));
        assert_eq!(stat.vsize, 12345678);
        assert_eq!(stat.rss_pages, 300);
        assert_eq!(stat.stack_size, 1168);
    }

    #[test]
    fn test_parse_stat_too_short() {
        assert!(parse_stat("1234 (x) S 1 2 3").is_err());
        assert!(parse_stat("garbage").is_err());
    }

    #[test]
    fn test_parse_status() {
        let status = parse_status(STATUS);
        assert_eq!(status.tgid, Some(1234));
        assert_eq!(status.vmem_data, Some(2048 * 1024));
        assert_eq!(status.vmem_code, Some(500 * 1024));
        assert_eq!(status.voluntary_ctx_switches, Some(55));
        assert_eq!(status.involuntary_ctx_switches, Some(3));
    }

    #[test]
    fn test_parse_status_kernel_thread() {
        let status = parse_status("Name:\tkworker/0:1\nTgid:\t9\n");
        assert_eq!(status.vmem_data, None);
        assert_eq!(status.vmem_code, None);
    }

    #[test]
    fn test_parse_io_marks_bad_values_unavailable() {
        let io = parse_io("rchar: 10\nwchar: oops\nsyscr: 3\n");
        assert_eq!(io, [Some(10), None, Some(3), None]);
    }

    #[test]
    fn test_read_sample() {
        let root = tempdir().unwrap();
        write_proc(root.path(), 1234, STAT);

        let reader = ProcReader::new(root.path()).with_page_size(4096);
        let sample = reader.read_sample(1234).unwrap();

        assert_eq!(sample.pid, 1234);
        assert_eq!(sample.num_proc, 1);
        assert_eq!(sample.num_lwp, 2);
        assert_eq!(sample.vmem_rss, 300 * 4096);
        assert_eq!(sample.cpu_user_ticks, Some(1000));
        assert_eq!(sample.io_read_bytes, Some(4000));
        assert_eq!(sample.io_write_ops, Some(10));
        assert_eq!(sample.voluntary_ctx_switches, Some(55));
    }

    #[test]
    fn test_read_sample_without_io() {
        let root = tempdir().unwrap();
        let dir = write_proc(root.path(), 1234, STAT);
        std::fs::remove_file(dir.join("io")).unwrap();

        let sample = ProcReader::new(root.path()).read_sample(1234).unwrap();
        assert_eq!(sample.io_read_bytes, None);
        assert_eq!(sample.io_write_bytes, None);
        assert_eq!(sample.cpu_user_ticks, Some(1000));
    }

    #[test]
    fn test_read_sample_zombie() {
        let root = tempdir().unwrap();
        write_proc(root.path(), 1234, &STAT.replacen(") S ", ") Z ", 1));

        let sample = ProcReader::new(root.path()).read_sample(1234).unwrap();
        assert_eq!(sample.state, ProcessState::Zombie);
        assert_eq!(sample.num_proc, 0);
        assert_eq!(sample.num_lwp, 0);
        assert_eq!(sample.cpu_user_ticks, None);
    }

    #[test]
    fn test_read_sample_vanished_process() {
        let root = tempdir().unwrap();
        assert!(ProcReader::new(root.path()).read_sample(99).is_err());
    }

    #[test]
    fn test_read_cmdline() {
        let root = tempdir().unwrap();
        let dir = write_proc(root.path(), 1234, STAT);
        let reader = ProcReader::new(root.path());

        assert_eq!(
            reader.read_cmdline(1234, "sim").as_deref(),
            Some("/usr/bin/sim --steps 100")
        );

        std::fs::write(dir.join("cmdline"), b"").unwrap();
        assert_eq!(reader.read_cmdline(1234, "sim").as_deref(), Some("[sim]"));
        assert_eq!(reader.read_cmdline(4321, "sim"), None);
    }

    #[test]
    fn test_is_thread() {
        let root = tempdir().unwrap();
        write_proc(root.path(), 1234, STAT);
        write_proc(root.path(), 1240, STAT);

        let reader = ProcReader::new(root.path());
        assert!(!reader.is_thread(1234));
        // status of 1240 reports Tgid 1234
        assert!(reader.is_thread(1240));
        assert!(!reader.is_thread(5555));
    }

    #[test]
    fn test_read_fork_count() {
        let root = tempdir().unwrap();
        std::fs::write(
            root.path().join("stat"),
            "cpu  1 2 3 4\nctxt 999\nprocesses 48213\nprocs_running 2\n",
        )
        .unwrap();
        let reader = ProcReader::new(root.path());
        assert_eq!(reader.read_fork_count().unwrap(), 48213);
    }
}

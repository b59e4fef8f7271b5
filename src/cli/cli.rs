use clap::Parser;
use regex::Regex;

/// A pattern job given on the command line as `JOB_ID=REGEX`.
#[derive(Debug, Clone)]
pub struct JobPattern {
    pub job_id: String,
    pub regex: Regex,
}

fn parse_job_pattern(s: &str) -> Result<JobPattern, String> {
    let (job_id, pattern) = s
        .split_once('=')
        .ok_or_else(|| format!("expected JOB_ID=REGEX, got '{}'", s))?;
    if job_id.is_empty() {
        return Err(format!("missing job id in '{}'", s));
    }
    let regex = Regex::new(pattern).map_err(|e| format!("invalid regex '{}': {}", pattern, e))?;
    Ok(JobPattern {
        job_id: job_id.to_string(),
        regex,
    })
}

/// Job Exporter - per-job process resource accounting for batch clusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = 9105)]
    pub port: u16,

    /// Listen address
    #[arg(short = 'a', long, env = "ADDRESS", default_value = "0.0.0.0")]
    pub address: String,

    /// Directory holding the scheduler's per-job cgroups
    #[arg(long, env = "CGROUP_ROOT", default_value = "/cgroup/cpuset/lsf/euler")]
    pub cgroup_root: String,

    /// Mount point of procfs
    #[arg(long, env = "PROC_ROOT", default_value = "/proc")]
    pub proc_root: String,

    /// Seconds between collection cycles
    #[arg(short, long, env = "INTERVAL", default_value_t = 10,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Cycles a vanished process is kept before eviction
    #[arg(long, env = "MAX_AGE", default_value_t = 10)]
    pub max_age: u64,

    /// Track processes whose command line matches REGEX as job JOB_ID
    #[arg(long = "job-pattern", value_name = "JOB_ID=REGEX", value_parser = parse_job_pattern)]
    pub job_patterns: Vec<JobPattern>,

    /// Only export job aggregates, not per-process series
    #[arg(long, env = "NO_PROCESS_METRICS")]
    pub no_process_metrics: bool,
}

use prometheus::{
    CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder,
    register_counter_vec_with_registry, register_gauge_vec_with_registry,
};
use lazy_static::lazy_static;
use std::sync::Arc;
use sysinfo::System;

use crate::models::Usage;
use crate::services::procfs::CLK_TCK;
use crate::state::AppStateInner;
use crate::tracker::counter::DerivedTotal;

/// One set of usage series, either per job or per process.
pub struct UsageMetrics {
    processes: GaugeVec,
    threads: GaugeVec,
    vmem_size: GaugeVec,
    vmem_rss: GaugeVec,
    vmem_data: GaugeVec,
    vmem_code: GaugeVec,
    stack_size: GaugeVec,
    ctx_switches: GaugeVec,

    cpu_user: CounterVec,
    cpu_system: CounterVec,
    minor_faults: CounterVec,
    major_faults: CounterVec,
    io_read_bytes: CounterVec,
    io_write_bytes: CounterVec,
    io_read_ops: CounterVec,
    io_write_ops: CounterVec,
}

impl UsageMetrics {
    fn new(registry: &Registry, prefix: &str, labels: &[&str]) -> prometheus::Result<Self> {
        let gauge = |name: &str, help: &str| {
            register_gauge_vec_with_registry!(
                Opts::new(format!("{}_{}", prefix, name), help),
                labels,
                registry
            )
        };
        let counter = |name: &str, help: &str| {
            register_counter_vec_with_registry!(
                Opts::new(format!("{}_{}", prefix, name), help),
                labels,
                registry
            )
        };

        let mut ctx_labels = labels.to_vec();
        ctx_labels.push("kind");

        Ok(Self {
            processes: gauge("processes", "Number of live processes")?,
            threads: gauge("threads", "Number of threads")?,
            vmem_size: gauge("memory_virtual_bytes", "Virtual memory size in bytes")?,
            vmem_rss: gauge("memory_rss_bytes", "Resident set size in bytes")?,
            vmem_data: gauge("memory_data_bytes", "Data segment size in bytes")?,
            vmem_code: gauge("memory_code_bytes", "Text and shared library size in bytes")?,
            stack_size: gauge("stack_bytes", "Stack size in bytes")?,
            ctx_switches: register_gauge_vec_with_registry!(
                Opts::new(
                    format!("{}_context_switches", prefix),
                    "Context switches by kind (voluntary, involuntary)"
                ),
                &ctx_labels,
                registry
            )?,
            cpu_user: counter("cpu_user_seconds_total", "CPU time spent in user mode")?,
            cpu_system: counter("cpu_system_seconds_total", "CPU time spent in kernel mode")?,
            minor_faults: counter("minor_page_faults_total", "Minor page faults")?,
            major_faults: counter("major_page_faults_total", "Major page faults")?,
            io_read_bytes: counter("io_read_bytes_total", "Bytes read (rchar)")?,
            io_write_bytes: counter("io_write_bytes_total", "Bytes written (wchar)")?,
            io_read_ops: counter("io_read_syscalls_total", "Read syscalls (syscr)")?,
            io_write_ops: counter("io_write_syscalls_total", "Write syscalls (syscw)")?,
        })
    }

    fn record(&self, labels: &[&str], usage: &Usage) {
        self.processes.with_label_values(labels).set(usage.num_proc as f64);
        self.threads.with_label_values(labels).set(usage.num_lwp as f64);
        self.vmem_size.with_label_values(labels).set(usage.vmem_size as f64);
        self.vmem_rss.with_label_values(labels).set(usage.vmem_rss as f64);
        self.stack_size.with_label_values(labels).set(usage.stack_size as f64);
        if let Some(v) = usage.vmem_data {
            self.vmem_data.with_label_values(labels).set(v as f64);
        }
        if let Some(v) = usage.vmem_code {
            self.vmem_code.with_label_values(labels).set(v as f64);
        }

        let mut ctx_labels = labels.to_vec();
        ctx_labels.push("voluntary");
        if let Some(v) = usage.voluntary_ctx_switches {
            self.ctx_switches.with_label_values(&ctx_labels).set(v as f64);
        }
        ctx_labels.pop();
        ctx_labels.push("involuntary");
        if let Some(v) = usage.involuntary_ctx_switches {
            self.ctx_switches.with_label_values(&ctx_labels).set(v as f64);
        }

        // Counter vectors are reset before every render, so inc_by sets the total
        self.cpu_user.with_label_values(labels).inc_by(ticks_to_seconds(usage.cpu_user_ticks));
        self.cpu_system.with_label_values(labels).inc_by(ticks_to_seconds(usage.cpu_system_ticks));
        self.minor_faults.with_label_values(labels).inc_by(usage.minor_faults as f64);
        self.major_faults.with_label_values(labels).inc_by(usage.major_faults as f64);

        if let Some((read, write)) = usage.io_bytes() {
            self.io_read_bytes.with_label_values(labels).inc_by(read as f64);
            self.io_write_bytes.with_label_values(labels).inc_by(write as f64);
        }
        if let Some((read, write)) = usage.io_ops() {
            self.io_read_ops.with_label_values(labels).inc_by(read as f64);
            self.io_write_ops.with_label_values(labels).inc_by(write as f64);
        }
    }

    fn reset(&self) {
        for g in [
            &self.processes,
            &self.threads,
            &self.vmem_size,
            &self.vmem_rss,
            &self.vmem_data,
            &self.vmem_code,
            &self.stack_size,
            &self.ctx_switches,
        ] {
            g.reset();
        }
        for c in [
            &self.cpu_user,
            &self.cpu_system,
            &self.minor_faults,
            &self.major_faults,
            &self.io_read_bytes,
            &self.io_write_bytes,
            &self.io_read_ops,
            &self.io_write_ops,
        ] {
            c.reset();
        }
    }
}

fn ticks_to_seconds(ticks: DerivedTotal) -> f64 {
    ticks as f64 / *CLK_TCK as f64
}

pub struct MetricsRegistry {
    registry: Registry,
    hostname: String,

    pub jobs: UsageMetrics,
    pub processes: UsageMetrics,

    pub process_states: GaugeVec,
    pub forks: CounterVec,
    pub tracked_jobs: GaugeVec,
    pub last_cycle_timestamp: GaugeVec,
}

impl MetricsRegistry {
    pub fn new(hostname: impl Into<String>) -> prometheus::Result<Self> {
        let registry = Registry::new();

        let job_labels = &["job_id", "job_name", "hostname"];
        let process_labels = &["job_id", "job_name", "pid", "hostname"];

        let jobs = UsageMetrics::new(&registry, "job", job_labels)?;
        let processes = UsageMetrics::new(&registry, "job_process", process_labels)?;

        let process_states = register_gauge_vec_with_registry!(
            Opts::new("jobmetrics_processes", "Job processes by scheduling state"),
            &["state", "hostname"],
            registry
        )?;

        let forks = register_counter_vec_with_registry!(
            Opts::new("jobmetrics_forks_total", "Processes created since boot"),
            &["hostname"],
            registry
        )?;

        let tracked_jobs = register_gauge_vec_with_registry!(
            Opts::new("jobmetrics_tracked_jobs", "Job records currently tracked"),
            &["hostname"],
            registry
        )?;

        let last_cycle_timestamp = register_gauge_vec_with_registry!(
            Opts::new(
                "jobmetrics_last_cycle_timestamp_seconds",
                "Unix timestamp of the last completed collection cycle"
            ),
            &["hostname"],
            registry
        )?;

        Ok(Self {
            registry,
            hostname: hostname.into(),
            jobs,
            processes,
            process_states,
            forks,
            tracked_jobs,
            last_cycle_timestamp,
        })
    }

    /// Replaces every series with the current content of the registry.
    pub fn publish(&self, state: &AppStateInner) {
        self.reset();
        let host = self.hostname.as_str();

        for job in state.registry.snapshot() {
            self.jobs
                .record(&[job.job_id(), job.job_name(), host], job.totals());

            if state.process_metrics {
                for p in job.processes() {
                    let pid = p.pid.to_string();
                    self.processes
                        .record(&[job.job_id(), job.job_name(), pid.as_str(), host], &p.usage);
                }
            }
        }

        for (label, count) in state.host.states.by_label() {
            self.process_states
                .with_label_values(&[label, host])
                .set(count as f64);
        }
        if let Some(forks) = state.host.forks {
            self.forks.with_label_values(&[host]).inc_by(forks as f64);
        }
        self.tracked_jobs
            .with_label_values(&[host])
            .set(state.registry.len() as f64);
        if let Some(ts) = state.host.last_cycle {
            self.last_cycle_timestamp
                .with_label_values(&[host])
                .set(ts as f64);
        }
    }

    pub fn render(&self) -> Result<String, Box<dyn std::error::Error>> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    fn reset(&self) {
        self.jobs.reset();
        self.processes.reset();
        self.process_states.reset();
        self.forks.reset();
        self.tracked_jobs.reset();
        self.last_cycle_timestamp.reset();
    }
}

lazy_static! {
    pub static ref METRICS: Arc<MetricsRegistry> = Arc::new(
        MetricsRegistry::new(System::host_name().unwrap_or_else(|| "unknown".to_string()))
            .expect("metric definitions are valid"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawProcessSample;
    use crate::state::new_state;
    use crate::tracker::JobRegistry;

    fn registry_with_job() -> JobRegistry {
        let mut reg = JobRegistry::new();
        reg.begin_cycle();
        for (pid, ticks) in [(10, 1000), (11, 500)] {
            let sample = RawProcessSample {
                cpu_user_ticks: Some(ticks),
                io_read_bytes: Some(64),
                io_write_bytes: Some(32),
                ..RawProcessSample::new(pid, "sim")
            };
            reg.ingest_sample("42", "sim", None, &sample);
        }
        reg.end_cycle();
        reg
    }

    #[test]
    fn test_publish_job_series() {
        let metrics = MetricsRegistry::new("node01").unwrap();
        let state = new_state(registry_with_job(), true);
        metrics.publish(&state.lock().unwrap());

        let text = metrics.render().unwrap();
        assert!(text.contains(
            "job_processes{hostname=\"node01\",job_id=\"42\",job_name=\"sim\"} 2"
        ));
        assert!(text.contains(
            "job_io_read_bytes_total{hostname=\"node01\",job_id=\"42\",job_name=\"sim\"} 128"
        ));
        assert!(text.contains("job_process_threads{hostname=\"node01\",job_id=\"42\",job_name=\"sim\",pid=\"11\"} 1"));
        assert!(text.contains("jobmetrics_tracked_jobs{hostname=\"node01\"} 1"));
        // io syscall counters were never available
        assert!(!text.contains("job_io_read_syscalls_total{"));
    }

    #[test]
    fn test_cpu_in_seconds() {
        let metrics = MetricsRegistry::new("node01").unwrap();
        let state = new_state(registry_with_job(), false);
        metrics.publish(&state.lock().unwrap());

        let families = metrics.registry.gather();
        let cpu = families
            .iter()
            .find(|f| f.get_name() == "job_cpu_user_seconds_total")
            .unwrap();
        let value = cpu.get_metric()[0].get_counter().get_value();
        assert!((value - 1500.0 / *CLK_TCK as f64).abs() < 1e-9);
    }

    #[test]
    fn test_process_series_can_be_disabled() {
        let metrics = MetricsRegistry::new("node01").unwrap();
        let state = new_state(registry_with_job(), false);
        metrics.publish(&state.lock().unwrap());

        let text = metrics.render().unwrap();
        assert!(!text.contains("job_process_threads{"));
        assert!(text.contains("job_threads{"));
    }

    #[test]
    fn test_removed_job_disappears() {
        let metrics = MetricsRegistry::new("node01").unwrap();
        let state = new_state(registry_with_job(), true);
        metrics.publish(&state.lock().unwrap());

        state.lock().unwrap().registry.remove_job("42");
        metrics.publish(&state.lock().unwrap());

        let text = metrics.render().unwrap();
        assert!(!text.contains("job_id=\"42\""));
    }
}

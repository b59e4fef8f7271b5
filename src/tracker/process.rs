use crate::models::{RawProcessSample, Usage};
use crate::tracker::counter::Counter;

/// Tracked state of one OS process belonging to a job.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pid: u32,
    /// Cycles since the last refreshing sample
    age: u64,
    /// Cycle number of the last refreshing sample
    last_seen: u64,

    // Gauges, replaced wholesale on every sample
    num_proc: u64,
    num_lwp: u64,
    vmem_size: u64,
    vmem_rss: u64,
    vmem_data: Option<u64>,
    vmem_code: Option<u64>,
    stack_size: u64,
    voluntary_ctx_switches: Option<u64>,
    involuntary_ctx_switches: Option<u64>,

    cpu_user: Counter,
    cpu_system: Counter,
    minor_faults: Counter,
    major_faults: Counter,

    // Cumulative per-process values kept by the kernel, copied through
    io_read_bytes: Option<u64>,
    io_write_bytes: Option<u64>,
    io_read_ops: Option<u64>,
    io_write_ops: Option<u64>,
}

impl ProcessRecord {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            age: 0,
            last_seen: 0,
            num_proc: 0,
            num_lwp: 0,
            vmem_size: 0,
            vmem_rss: 0,
            vmem_data: None,
            vmem_code: None,
            stack_size: 0,
            voluntary_ctx_switches: None,
            involuntary_ctx_switches: None,
            cpu_user: Counter::new(),
            cpu_system: Counter::new(),
            minor_faults: Counter::new(),
            major_faults: Counter::new(),
            io_read_bytes: None,
            io_write_bytes: None,
            io_read_ops: None,
            io_write_ops: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn age(&self) -> u64 {
        self.age
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Refreshes the record from a sample taken during cycle `cycle`.
    ///
    /// Ingesting twice in the same cycle applies the counter deltas twice
    /// against the stored baseline; nothing is deduplicated.
    pub fn ingest(&mut self, sample: &RawProcessSample, cycle: u64) {
        self.num_proc = sample.num_proc;
        self.num_lwp = sample.num_lwp;
        self.vmem_size = sample.vmem_size;
        self.vmem_rss = sample.vmem_rss;
        self.vmem_data = sample.vmem_data;
        self.vmem_code = sample.vmem_code;
        self.stack_size = sample.stack_size;
        self.voluntary_ctx_switches = sample.voluntary_ctx_switches;
        self.involuntary_ctx_switches = sample.involuntary_ctx_switches;

        self.cpu_user.observe(sample.cpu_user_ticks);
        self.cpu_system.observe(sample.cpu_system_ticks);
        self.minor_faults.observe(sample.minor_faults);
        self.major_faults.observe(sample.major_faults);

        self.io_read_bytes = sample.io_read_bytes;
        self.io_write_bytes = sample.io_write_bytes;
        self.io_read_ops = sample.io_read_ops;
        self.io_write_ops = sample.io_write_ops;

        self.age = 0;
        self.last_seen = cycle;
    }

    /// Counts one more cycle without a refresh and returns the new age.
    pub fn grow_older(&mut self) -> u64 {
        self.age += 1;
        self.age
    }

    /// Current values of this process in emission form.
    pub fn usage(&self) -> Usage {
        Usage {
            num_proc: self.num_proc,
            num_lwp: self.num_lwp,
            vmem_size: self.vmem_size,
            vmem_rss: self.vmem_rss,
            vmem_data: self.vmem_data,
            vmem_code: self.vmem_code,
            stack_size: self.stack_size,
            voluntary_ctx_switches: self.voluntary_ctx_switches,
            involuntary_ctx_switches: self.involuntary_ctx_switches,
            cpu_user_ticks: self.cpu_user.total(),
            cpu_system_ticks: self.cpu_system.total(),
            minor_faults: self.minor_faults.total(),
            major_faults: self.major_faults.total(),
            io_read_bytes: self.io_read_bytes,
            io_write_bytes: self.io_write_bytes,
            io_read_ops: self.io_read_ops,
            io_write_ops: self.io_write_ops,
        }
    }
}

use serde::Serialize;

/// One reading of a single process, taken once per collection cycle.
///
/// Fields that the OS could not provide are `None`; a `None` is never the
/// same thing as a zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawProcessSample {
    pub pid: u32,
    /// Process name as reported by the kernel (`comm`)
    pub name: String,
    pub state: ProcessState,

    /// 1 for a live process, 0 for a zombie
    pub num_proc: u64,
    /// Number of threads
    pub num_lwp: u64,
    pub vmem_size: u64,
    pub vmem_rss: u64,
    pub vmem_data: Option<u64>,
    pub vmem_code: Option<u64>,
    pub stack_size: u64,

    pub cpu_user_ticks: Option<u64>,
    pub cpu_system_ticks: Option<u64>,
    pub minor_faults: Option<u64>,
    pub major_faults: Option<u64>,

    pub io_read_bytes: Option<u64>,
    pub io_write_bytes: Option<u64>,
    pub io_read_ops: Option<u64>,
    pub io_write_ops: Option<u64>,

    pub voluntary_ctx_switches: Option<u64>,
    pub involuntary_ctx_switches: Option<u64>,
}

impl RawProcessSample {
    /// A sample carrying only an identity, every counter unavailable.
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            num_proc: 1,
            num_lwp: 1,
            ..Self::default()
        }
    }
}

/// Scheduling state letter from `/proc/<pid>/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Running,
    Sleeping,
    Blocked,
    Zombie,
    Stopped,
    Paging,
    #[default]
    Other,
}

impl ProcessState {
    pub fn from_letter(c: char) -> Self {
        match c {
            'R' => Self::Running,
            'S' => Self::Sleeping,
            'D' => Self::Blocked,
            'Z' => Self::Zombie,
            'T' => Self::Stopped,
            'W' => Self::Paging,
            _ => Self::Other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Sleeping => "sleeping",
            Self::Blocked => "blocked",
            Self::Zombie => "zombies",
            Self::Stopped => "stopped",
            Self::Paging => "paging",
            Self::Other => "other",
        }
    }
}

use serde::{Serialize, Serializer};

use crate::tracker::counter::DerivedTotal;

/// Resource usage of one process, or the sum over all processes of a job.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct Usage {
    /// Live processes (zombies count as 0)
    pub num_proc: u64,
    /// Threads
    pub num_lwp: u64,

    /// Virtual memory size in bytes
    pub vmem_size: u64,
    /// Resident set size in bytes
    pub vmem_rss: u64,
    pub vmem_data: Option<u64>,
    pub vmem_code: Option<u64>,
    pub stack_size: u64,

    pub voluntary_ctx_switches: Option<u64>,
    pub involuntary_ctx_switches: Option<u64>,

    // Running totals, in clock ticks and fault counts
    #[serde(serialize_with = "serialize_total")]
    pub cpu_user_ticks: DerivedTotal,
    #[serde(serialize_with = "serialize_total")]
    pub cpu_system_ticks: DerivedTotal,
    #[serde(serialize_with = "serialize_total")]
    pub minor_faults: DerivedTotal,
    #[serde(serialize_with = "serialize_total")]
    pub major_faults: DerivedTotal,

    pub io_read_bytes: Option<u64>,
    pub io_write_bytes: Option<u64>,
    pub io_read_ops: Option<u64>,
    pub io_write_ops: Option<u64>,
}

impl Usage {
    /// Zeroed gauges and totals, every optional field unavailable.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds `other` into `self`.
    ///
    /// Unavailable contributors are skipped; an optional field stays
    /// unavailable only while every contributor so far was unavailable.
    pub fn absorb(&mut self, other: &Usage) {
        self.num_proc += other.num_proc;
        self.num_lwp += other.num_lwp;
        self.vmem_size += other.vmem_size;
        self.vmem_rss += other.vmem_rss;
        self.stack_size += other.stack_size;

        self.cpu_user_ticks = self.cpu_user_ticks.wrapping_add(other.cpu_user_ticks);
        self.cpu_system_ticks = self.cpu_system_ticks.wrapping_add(other.cpu_system_ticks);
        self.minor_faults = self.minor_faults.wrapping_add(other.minor_faults);
        self.major_faults = self.major_faults.wrapping_add(other.major_faults);

        fold(&mut self.vmem_data, other.vmem_data);
        fold(&mut self.vmem_code, other.vmem_code);
        fold(&mut self.voluntary_ctx_switches, other.voluntary_ctx_switches);
        fold(&mut self.involuntary_ctx_switches, other.involuntary_ctx_switches);
        fold(&mut self.io_read_bytes, other.io_read_bytes);
        fold(&mut self.io_write_bytes, other.io_write_bytes);
        fold(&mut self.io_read_ops, other.io_read_ops);
        fold(&mut self.io_write_ops, other.io_write_ops);
    }

    /// Read and write bytes, only when both are known.
    pub fn io_bytes(&self) -> Option<(u64, u64)> {
        Some((self.io_read_bytes?, self.io_write_bytes?))
    }

    /// Read and write syscalls, only when both are known.
    pub fn io_ops(&self) -> Option<(u64, u64)> {
        Some((self.io_read_ops?, self.io_write_ops?))
    }
}

/// JSON numbers stop at 64 bits; larger totals go out as floats.
fn serialize_total<S: Serializer>(total: &DerivedTotal, serializer: S) -> Result<S::Ok, S::Error> {
    match u64::try_from(*total) {
        Ok(v) => serializer.serialize_u64(v),
        Err(_) => serializer.serialize_f64(*total as f64),
    }
}

fn fold(acc: &mut Option<u64>, value: Option<u64>) {
    if let Some(v) = value {
        *acc = Some(acc.unwrap_or(0).saturating_add(v));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_skips_unavailable() {
        let mut total = Usage::empty();
        let a = Usage {
            num_proc: 1,
            io_read_bytes: Some(100),
            ..Usage::default()
        };
        let b = Usage {
            num_proc: 1,
            io_read_bytes: None,
            ..Usage::default()
        };

        total.absorb(&a);
        total.absorb(&b);

        assert_eq!(total.num_proc, 2);
        assert_eq!(total.io_read_bytes, Some(100));
        assert_eq!(total.io_write_bytes, None);
    }

    #[test]
    fn test_wide_totals_serialize() {
        let usage = Usage {
            cpu_user_ticks: 7,
            minor_faults: DerivedTotal::from(u64::MAX) + 1,
            ..Usage::default()
        };
        let value = serde_json::to_value(&usage).unwrap();
        assert_eq!(value["cpu_user_ticks"], 7);
        assert!(value["minor_faults"].as_f64().unwrap() > u64::MAX as f64 / 2.0);
    }

    #[test]
    fn test_io_pairs_need_both_sides() {
        let usage = Usage {
            io_read_bytes: Some(1),
            io_write_bytes: None,
            io_read_ops: Some(2),
            io_write_ops: Some(3),
            ..Usage::default()
        };
        assert_eq!(usage.io_bytes(), None);
        assert_eq!(usage.io_ops(), Some((2, 3)));
    }
}

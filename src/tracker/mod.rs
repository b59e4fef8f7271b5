//! Job and process bookkeeping across collection cycles.
//!
//! - `counter`: wraparound-safe running totals over kernel counters
//! - `process`: per-process state and aging
//! - `job`: job identity matching and per-job aggregates
//! - `registry`: the cycle protocol over all jobs

pub mod counter;
pub mod job;
pub mod process;
pub mod registry;

pub use registry::{Ingest, JobRegistry};

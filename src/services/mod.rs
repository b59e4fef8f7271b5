pub mod collector;
pub mod inventory;
pub mod procfs;

pub use collector::{Collector, HostStats};

pub mod process;
pub mod stats;

pub use process::{ProcessState, RawProcessSample};
pub use stats::Usage;

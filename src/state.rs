use crate::services::HostStats;
use crate::tracker::JobRegistry;
use std::sync::{Arc, Mutex};

pub struct AppStateInner {
    pub registry: JobRegistry,
    pub host: HostStats,
    /// Emit per-process series next to the job aggregates
    pub process_metrics: bool,
}

/// One lock guards the registry for a whole collection cycle.
pub type AppState = Arc<Mutex<AppStateInner>>;

pub fn new_state(registry: JobRegistry, process_metrics: bool) -> AppState {
    Arc::new(Mutex::new(AppStateInner {
        registry,
        host: HostStats::default(),
        process_metrics,
    }))
}

mod orchestrator;
mod service;
mod snapshot;

pub use orchestrator::SessionOrchestrator;
pub use service::{SensorSender, SessionHandle, SessionService};
pub use snapshot::{ActivePhase, DebugInfo, SessionState, WalkingSnapshot};

use chrono::{DateTime, Utc};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub(crate) fn stamp(epoch_ms: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(epoch_ms as i64).unwrap_or_default()
}

// ── Endpoint diagnostics ──

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters kept by the connection worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointStats {
    pub cycles_completed: u64,
    /// Ticks that found the previous cycle still in flight.
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    /// Connect attempts after the first.
    pub reconnect_attempts: u64,
    /// Tag writes confirmed by the controller.
    pub writes_flushed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_cycle_duration: Option<Duration>,
}

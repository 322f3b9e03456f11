// ── Runtime endpoint configuration ──
//
// Describes *where* an endpoint connects and how its loops are paced.
// Built by the CLI (or any host) and handed to `Endpoint` -- core never
// reads config files.

use std::time::Duration;

use serde::Serialize;

use crate::error::CoreError;

/// Default scan-cycle period.
pub const DEFAULT_CYCLE_TIME: Duration = Duration::from_millis(500);
/// Fixed delay between a failure and the next connect attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Bound applied to every protocol-client call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Consecutive overlapping ticks tolerated before the connection is
/// considered stuck.
pub const DEFAULT_MAX_SKIPPED_CYCLES: u32 = 10;

/// Configuration for one controller endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointConfig {
    /// Controller address (IP or host name).
    pub address: String,
    /// Backplane slot of the CPU.
    pub slot: u8,
    /// Scan-cycle period.
    pub cycle_time: Duration,
    /// Delay before reconnecting after any failure.
    pub reconnect_delay: Duration,
    /// Bound for connect, read, write and disconnect.
    pub timeout: Duration,
    /// Skip threshold for the overlap guard.
    pub max_skipped_cycles: u32,
}

impl EndpointConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Reject values the endpoint cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |message: &str| {
            Err(CoreError::Config {
                message: message.to_owned(),
            })
        };

        if self.address.trim().is_empty() {
            return invalid("address must not be empty");
        }
        if self.cycle_time.is_zero() {
            return invalid("cycle_time must be greater than zero");
        }
        if self.reconnect_delay.is_zero() {
            return invalid("reconnect_delay must be greater than zero");
        }
        if self.timeout.is_zero() {
            return invalid("timeout must be greater than zero");
        }
        if self.max_skipped_cycles == 0 {
            return invalid("max_skipped_cycles must be at least 1");
        }
        Ok(())
    }

    /// Timeout in whole milliseconds, for error reporting.
    pub(crate) fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            slot: 0,
            cycle_time: DEFAULT_CYCLE_TIME,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            timeout: DEFAULT_TIMEOUT,
            max_skipped_cycles: DEFAULT_MAX_SKIPPED_CYCLES,
        }
    }
}

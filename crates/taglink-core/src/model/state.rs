// ── Connection lifecycle states ──

use serde::Serialize;
use strum::Display;

/// Lifecycle state of an endpoint's connection, observable through
/// [`Endpoint::state_stream`](crate::Endpoint::state_stream).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// Constructed, `connect()` not called yet.
    Idle,
    Connecting,
    Online,
    /// Connection lost; a reconnect is pending.
    Offline,
    /// Shutdown requested. Absorbing.
    Closing,
}

impl ConnectionState {
    /// The status this state publishes, if any.
    pub fn status(self) -> Option<EndpointStatus> {
        match self {
            Self::Idle => None,
            Self::Connecting => Some(EndpointStatus::Connecting),
            Self::Online => Some(EndpointStatus::Online),
            Self::Offline | Self::Closing => Some(EndpointStatus::Offline),
        }
    }

    pub fn is_online(self) -> bool {
        self == Self::Online
    }
}

/// Item of the status stream delivered to status subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EndpointStatus {
    Connecting,
    Online,
    Offline,
}

// ── Core error types ──
//
// Endpoint-level errors. Consumers never see raw protocol-client errors:
// every client result passes through `From<taglink_api::Error>`. A connect
// attempt that fails for any reason other than a refusal is reported as
// `ConnectFailed` carrying the translated error.

use thiserror::Error;

/// Unified error type for the core crate.
///
/// `Clone` because a single flush failure is fanned out to every
/// completion queued for the flushed tags.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    // ── Tag errors ───────────────────────────────────────────────────
    #[error("Invalid tag name {name:?}: {reason}")]
    InvalidTagName { name: String, reason: String },

    #[error("Unknown tag: {key}")]
    UnknownTag { key: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to controller at {address}: {reason}")]
    ConnectFailed { address: String, reason: String },

    #[error("Controller session failed: {reason}")]
    RuntimeError { reason: String },

    #[error("Scan cycle failed: {reason}")]
    CycleFailed { reason: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    // ── Write outcomes ───────────────────────────────────────────────
    #[error("Write to {key} rejected by controller: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Connection lost before the write was confirmed")]
    Disconnected,

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Endpoint is shutting down")]
    ShutdownInProgress,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Wrap any failure of a connect attempt.
    pub(crate) fn connect_failed(address: &str, err: impl std::fmt::Display) -> Self {
        Self::ConnectFailed {
            address: address.to_owned(),
            reason: err.to_string(),
        }
    }

    /// Returns `true` for errors that mean the session itself is unusable,
    /// as opposed to the controller rejecting a tag or value. Either kind
    /// ends the current connection.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. }
                | Self::RuntimeError { .. }
                | Self::CycleFailed { .. }
                | Self::Timeout { .. }
        )
    }
}

// ── Conversion from protocol-client errors ───────────────────────────

impl From<taglink_api::Error> for CoreError {
    fn from(err: taglink_api::Error) -> Self {
        match err {
            taglink_api::Error::ConnectionRefused { address, reason } => {
                CoreError::ConnectFailed { address, reason }
            }
            taglink_api::Error::NotConnected | taglink_api::Error::SessionClosed => {
                CoreError::RuntimeError {
                    reason: err.to_string(),
                }
            }
            taglink_api::Error::Timeout {
                operation,
                timeout_ms,
            } => CoreError::Timeout {
                operation,
                timeout_ms,
            },
            taglink_api::Error::TagNotFound { tag } => CoreError::UnknownTag { key: tag },
            taglink_api::Error::TypeMismatch { ref value, target } => CoreError::InvalidValue {
                key: value.clone(),
                reason: format!("not representable as {target}"),
            },
            taglink_api::Error::Protocol(message) => CoreError::CycleFailed { reason: message },
        }
    }
}

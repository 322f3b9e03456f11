use thiserror::Error;

use crate::types::DataType;

/// Top-level error type for the `taglink-api` crate.
///
/// Covers every failure a protocol client can report: session setup,
/// transport loss, per-tag addressing and value typing.
/// `taglink-core` maps these into endpoint-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Session ─────────────────────────────────────────────────────
    /// The controller refused or never answered the session request.
    #[error("Connection to {address} refused: {reason}")]
    ConnectionRefused { address: String, reason: String },

    /// An exchange was attempted without an established session.
    #[error("Not connected to a controller")]
    NotConnected,

    /// The controller closed the session underneath us.
    #[error("Session closed by controller")]
    SessionClosed,

    // ── Transport ───────────────────────────────────────────────────
    /// The client's own request bound expired.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    // ── Tags ────────────────────────────────────────────────────────
    /// The controller does not know the requested tag.
    #[error("Tag not found on controller: {tag}")]
    TagNotFound { tag: String },

    /// A value cannot be represented as the requested data type.
    #[error("Cannot convert {value} to {target}")]
    TypeMismatch { value: String, target: DataType },

    // ── Protocol ────────────────────────────────────────────────────
    /// Any other protocol-level rejection (general status, malformed reply).
    #[error("Protocol error: {0}")]
    Protocol(String),
}

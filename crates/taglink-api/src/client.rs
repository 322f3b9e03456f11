// ── Protocol client contract ──
//
// The capability an endpoint consumes to talk to one controller. The
// wire encoding lives behind this trait; the endpoint only sees batched
// read/write exchanges and out-of-band session events.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Error;
use crate::types::{TagAddress, TagValue, TagWrite};

/// Out-of-band notifications raised by a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The session hit a runtime error (socket reset, malformed frame).
    Error(String),
    /// The controller ended the session.
    SessionEnded,
}

/// A request/response session with one controller.
///
/// Implementations are not required to support concurrent in-flight
/// exchanges; the endpoint guarantees at most one exchange at a time.
/// Every method must be bounded by the client's own timeout.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open a session to `address`, routing through backplane `slot`.
    async fn connect(&self, address: &str, slot: u8) -> Result<(), Error>;

    /// Close the session. Must be callable on a broken or never-opened
    /// session.
    async fn disconnect(&self) -> Result<(), Error>;

    /// Read every tag in one coalesced exchange. The result is aligned
    /// positionally with `tags`.
    async fn read_tag_group(&self, tags: &[TagAddress]) -> Result<Vec<TagValue>, Error>;

    /// Write every entry in one coalesced exchange.
    async fn write_tag_group(&self, writes: &[TagWrite]) -> Result<(), Error>;

    /// Subscribe to session events. Each call returns a fresh receiver.
    fn events(&self) -> broadcast::Receiver<ClientEvent>;
}

/// Produces a fresh client for every connect attempt.
///
/// A torn-down client is never reused, so implementations should return
/// a new session object each time.
pub trait ClientFactory: Send + Sync {
    fn create(&self) -> Arc<dyn ProtocolClient>;
}

impl<F> ClientFactory for F
where
    F: Fn() -> Arc<dyn ProtocolClient> + Send + Sync,
{
    fn create(&self) -> Arc<dyn ProtocolClient> {
        self()
    }
}

//! Endpoint connection and scan-cycle engine for request/response
//! industrial controllers.
//!
//! One [`Endpoint`] keeps a self-healing session to one controller and
//! mirrors a set of named tags into a local cache:
//!
//! - **[`TagRegistry`]** -- program-qualified tag handles, validated at
//!   registration. Invalid entries are skipped with a warning, duplicate
//!   keys replace earlier handles.
//!
//! - **Connection task** -- `Idle → Connecting → Online → Offline`, with
//!   `Closing` on shutdown. Any connect error, session error or failed cycle
//!   tears the client down, resets every tag to unknown, publishes
//!   `offline` and reconnects after a fixed delay.
//!
//! - **Scan cycle** -- on each tick: flush coalesced writes, read the whole
//!   [`TagGroup`] in one exchange, publish per-tag changes and then one
//!   aggregate snapshot. At most one cycle is in flight; too many skipped
//!   ticks mark the connection as stuck.
//!
//! - **Notifications** -- status and change handlers with an unsubscribe
//!   [`Subscription`], plus `watch`/`broadcast` channels and a
//!   [`ChangeStream`] for async consumers.
//!
//! - **Writes** -- [`Endpoint::request_write`] never blocks; the last value
//!   per tag wins and every requester receives the flush outcome.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod group;
pub mod model;
mod notify;
pub mod presentation;
pub mod registry;
mod scan;
pub mod stream;
pub mod writes;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::EndpointConfig;
pub use endpoint::Endpoint;
pub use error::CoreError;
pub use group::TagGroup;
pub use model::tag::TagRef;
pub use model::{
    ChangeEvent, ConnectionState, CycleSnapshot, EndpointStats, EndpointStatus, Tag, TagChange,
    TagHandle,
};
pub use notify::Subscription;
pub use presentation::{DisplayStatus, ReadMessage, ReadMode, ReadPayload, StatusDisplay};
pub use registry::{RegistrationReport, SkippedTag, TagDefinition, TagRegistry};
pub use stream::ChangeStream;
pub use writes::{WriteOutcome, WriteTicket};

// Protocol types consumers need alongside the endpoint.
pub use taglink_api::{ClientFactory, DataType, ProtocolClient, TagValue};

// ── Domain model ──

pub mod change;
pub mod state;
pub mod stats;
pub mod tag;

pub use change::{ChangeEvent, CycleSnapshot, TagChange};
pub use state::{ConnectionState, EndpointStatus};
pub use stats::EndpointStats;
pub use tag::{Tag, TagHandle};

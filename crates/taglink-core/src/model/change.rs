// ── Change events ──

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use taglink_api::TagValue;

/// One tag whose value changed during a scan cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagChange {
    pub key: String,
    pub value: TagValue,
    /// `None` when the tag was uninitialized before this read.
    pub previous: Option<TagValue>,
    pub at: DateTime<Utc>,
}

impl TagChange {
    pub(crate) fn new(key: String, value: TagValue, previous: Option<TagValue>) -> Self {
        Self {
            key,
            value,
            previous,
            at: Utc::now(),
        }
    }
}

/// Aggregate notification raised once per cycle in which anything changed.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSnapshot {
    /// Per-tag changes of this cycle, in group order.
    pub changed: Vec<Arc<TagChange>>,
    /// Every registered tag's value after the cycle.
    pub values: IndexMap<String, Option<TagValue>>,
    pub at: DateTime<Utc>,
}

/// Item of the multicast change stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    Tag(Arc<TagChange>),
    AllChanged(Arc<CycleSnapshot>),
}

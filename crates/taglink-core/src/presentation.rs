// ── Consumer-side presentation ──
//
// Display-only derivations for nodes that render an endpoint: the status
// badge and the message shapes a reading node emits. Neither feeds back
// into the connection state machine.

use indexmap::IndexMap;
use serde::Serialize;
use strum::Display;
use taglink_api::TagValue;

use crate::model::{EndpointStatus, TagChange};

// ── Status badge ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Fill {
    Green,
    Yellow,
    Red,
    Grey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Shape {
    Dot,
    Ring,
}

/// Everything a badge can show. `BadValues` and `Error` are local to the
/// consumer; the endpoint itself only publishes the other three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DisplayStatus {
    Online,
    BadValues,
    Offline,
    Error,
    Connecting,
    Unknown,
}

impl From<EndpointStatus> for DisplayStatus {
    fn from(status: EndpointStatus) -> Self {
        match status {
            EndpointStatus::Connecting => Self::Connecting,
            EndpointStatus::Online => Self::Online,
            EndpointStatus::Offline => Self::Offline,
        }
    }
}

impl From<Option<EndpointStatus>> for DisplayStatus {
    fn from(status: Option<EndpointStatus>) -> Self {
        status.map_or(Self::Unknown, Self::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusDisplay {
    pub fill: Fill,
    pub shape: Shape,
    pub text: String,
}

impl StatusDisplay {
    /// Badge for `status`. While online the badge shows the consumer's
    /// last value when there is one.
    pub fn for_status(status: impl Into<DisplayStatus>, value: Option<&TagValue>) -> Self {
        let status = status.into();
        let (fill, text) = match status {
            DisplayStatus::Online => (
                Fill::Green,
                value.map_or_else(|| "online".to_owned(), plain_text),
            ),
            DisplayStatus::BadValues => (Fill::Yellow, "bad values".to_owned()),
            DisplayStatus::Offline => (Fill::Red, "offline".to_owned()),
            DisplayStatus::Error => (Fill::Red, "error".to_owned()),
            DisplayStatus::Connecting => (Fill::Yellow, "connecting".to_owned()),
            DisplayStatus::Unknown => (Fill::Grey, "unknown".to_owned()),
        };
        Self {
            fill,
            shape: Shape::Dot,
            text,
        }
    }
}

/// Strings render without quotes on a badge.
fn plain_text(value: &TagValue) -> String {
    match value {
        TagValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Read modes ───────────────────────────────────────────────────────

/// What a reading consumer wants to hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadMode {
    /// Changes of one tag, by key.
    Single(String),
    /// One message per changed tag.
    AllSplit,
    /// One message per cycle carrying every tag value.
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadPayload {
    Value(TagValue),
    All(IndexMap<String, Option<TagValue>>),
}

/// Message emitted by a reading consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadMessage {
    /// Tag key for per-tag messages, empty for `All`.
    pub topic: String,
    pub payload: ReadPayload,
    #[serde(rename = "lastValue")]
    pub last_value: Option<TagValue>,
}

impl ReadMessage {
    pub fn from_change(change: &TagChange) -> Self {
        Self {
            topic: change.key.clone(),
            payload: ReadPayload::Value(change.value.clone()),
            last_value: change.previous.clone(),
        }
    }

    pub fn all(values: IndexMap<String, Option<TagValue>>) -> Self {
        Self {
            topic: String::new(),
            payload: ReadPayload::All(values),
            last_value: None,
        }
    }
}

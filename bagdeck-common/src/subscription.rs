//! Subscription payload types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How eagerly a consumer wants a topic's history
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreloadType {
    /// Preload the topic's entire history into the block cache
    Full,
    /// Only read around the playhead
    Partial,
}

impl std::fmt::Display for PreloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreloadType::Full => write!(f, "full"),
            PreloadType::Partial => write!(f, "partial"),
        }
    }
}

/// One consumer's request for a topic
///
/// `fields: None` means the whole message; `Some(set)` asks for a sliced
/// delivery restricted to those fields. Field sets use `BTreeSet` so merged
/// output is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribePayload {
    pub topic: String,
    pub preload_type: PreloadType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<BTreeSet<String>>,
}

impl SubscribePayload {
    /// Whole-message subscription
    pub fn full(topic: impl Into<String>) -> Self {
        SubscribePayload {
            topic: topic.into(),
            preload_type: PreloadType::Full,
            fields: None,
        }
    }

    /// Playhead-window subscription for the whole message
    pub fn partial(topic: impl Into<String>) -> Self {
        SubscribePayload {
            topic: topic.into(),
            preload_type: PreloadType::Partial,
            fields: None,
        }
    }

    /// Playhead-window subscription restricted to `fields`
    pub fn partial_fields<I, S>(topic: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SubscribePayload {
            topic: topic.into(),
            preload_type: PreloadType::Partial,
            fields: Some(fields.into_iter().map(Into::into).collect()),
        }
    }
}

//! Message and topic types
//!
//! The format-agnostic data model shared by every source implementation.
//! Payloads stay opaque bytes keyed by schema name; decoding into typed
//! structs is a per-schema decoder concern, not part of the engine.

use crate::player::PlayerProblem;
use crate::time::Time;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named, schema-typed channel of time-ordered messages
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    /// Topic name, e.g. `/imu/data`
    pub name: String,

    /// Name of the schema describing this topic's payloads
    pub schema_name: String,
}

impl Topic {
    pub fn new(name: impl Into<String>, schema_name: impl Into<String>) -> Self {
        Topic {
            name: name.into(),
            schema_name: schema_name.into(),
        }
    }
}

/// One recorded message
///
/// `receive_time` is non-decreasing within a single topic's stream but not
/// across topics; cross-topic ordering is the time-merge iterator's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Topic name this message arrived on
    pub topic: String,

    /// Schema of the payload
    pub schema_name: String,

    /// Time the message was recorded
    pub receive_time: Time,

    /// Opaque encoded payload
    pub message: Vec<u8>,

    /// Size the message accounts for in frame and cache budgets
    pub size_in_bytes: u64,
}

/// Per-topic statistics reported at initialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicStats {
    /// Total number of messages on the topic
    pub message_count: u64,

    /// Receive time of the first message, if any
    pub first_message_time: Option<Time>,

    /// Receive time of the last message, if any
    pub last_message_time: Option<Time>,
}

/// Source descriptor produced by `IterableSource::initialize`
#[derive(Debug, Clone, Default)]
pub struct Initialization {
    /// Earliest receive time in the source
    pub start: Time,

    /// Latest receive time in the source
    pub end: Time,

    /// All topics discovered in the source
    pub topics: Vec<Topic>,

    /// Statistics per topic name
    pub topic_stats: BTreeMap<String, TopicStats>,

    /// Schema definitions keyed by schema name, passed through opaquely to
    /// decoders; empty when the source carries none
    pub datatypes: BTreeMap<String, String>,

    /// Non-fatal problems encountered while reading the source header
    pub problems: Vec<PlayerProblem>,

    /// Free-form source metadata (format name, recorder version, ...)
    pub metadata: BTreeMap<String, String>,
}

/// Merge several source descriptors into one
///
/// Used when a player is backed by more than one underlying reader (split
/// recordings, overlapping bags). Time range is the union; duplicate topic
/// names keep the first-seen schema and report a mismatch problem; stats
/// accumulate.
pub fn merge_initializations(inits: Vec<Initialization>) -> Initialization {
    let mut merged = Initialization::default();
    let mut first = true;

    for init in inits {
        if first {
            merged.start = init.start;
            merged.end = init.end;
            first = false;
        } else {
            merged.start = merged.start.min(init.start);
            merged.end = merged.end.max(init.end);
        }

        for topic in init.topics {
            match merged.topics.iter().find(|t| t.name == topic.name) {
                None => merged.topics.push(topic),
                Some(existing) if existing.schema_name != topic.schema_name => {
                    merged.problems.push(PlayerProblem::warn(format!(
                        "Topic {} has conflicting schemas: {} and {}",
                        topic.name, existing.schema_name, topic.schema_name
                    )));
                }
                Some(_) => {}
            }
        }

        for (name, stats) in init.topic_stats {
            let entry = merged.topic_stats.entry(name).or_default();
            entry.message_count += stats.message_count;
            entry.first_message_time = match (entry.first_message_time, stats.first_message_time) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            entry.last_message_time = match (entry.last_message_time, stats.last_message_time) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
        }

        merged.problems.extend(init.problems);
        merged.datatypes.extend(init.datatypes);
        merged.metadata.extend(init.metadata);
    }

    merged
}

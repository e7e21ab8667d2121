//! Subscription multiplexer
//!
//! Many consumers subscribe to overlapping topic/field sets at once. The
//! multiplexer keeps each consumer's request separately and merges them
//! into the minimal effective subscription set handed to the cache and the
//! source, so one read serves every interested consumer.

use bagdeck_common::{PreloadType, SubscribePayload};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Identifies one subscribing consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        SubscriberId(Uuid::new_v4())
    }
}

/// Result of updating a subscriber's requests
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionDelta {
    /// True when the effective set differs from before the update
    pub changed: bool,

    /// Topics present in the new effective set but not the old one.
    /// These are the only topics needing a fresh fetch; cached blocks for
    /// surviving topics stay valid.
    pub added_topics: Vec<String>,
}

/// Merges per-consumer subscription requests into a minimal effective set
#[derive(Debug, Default)]
pub struct SubscriptionMultiplexer {
    /// Per-subscriber requests in subscriber insertion order
    subscribers: Vec<(SubscriberId, Vec<SubscribePayload>)>,

    /// Cached merge of all subscribers' requests
    effective: Vec<SubscribePayload>,
}

impl SubscriptionMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace one subscriber's requests and recompute the effective set
    pub fn set_subscriptions(
        &mut self,
        id: SubscriberId,
        payloads: Vec<SubscribePayload>,
    ) -> SubscriptionDelta {
        match self.subscribers.iter_mut().find(|(sid, _)| *sid == id) {
            Some((_, existing)) => *existing = payloads,
            None => self.subscribers.push((id, payloads)),
        }
        self.recompute()
    }

    /// Drop a subscriber entirely and recompute the effective set
    pub fn remove_subscriber(&mut self, id: SubscriberId) -> SubscriptionDelta {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        if self.subscribers.len() == before {
            return SubscriptionDelta::default();
        }
        self.recompute()
    }

    /// The merged effective subscription set, stable across identical inputs
    pub fn effective(&self) -> &[SubscribePayload] {
        &self.effective
    }

    /// Unique topic names in effective order
    pub fn topics(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.effective
            .iter()
            .filter(|p| seen.insert(p.topic.clone()))
            .map(|p| p.topic.clone())
            .collect()
    }

    fn recompute(&mut self) -> SubscriptionDelta {
        let all: Vec<SubscribePayload> = self
            .subscribers
            .iter()
            .flat_map(|(_, payloads)| payloads.iter().cloned())
            .collect();
        let merged = Self::merge(&all);

        if merged == self.effective {
            return SubscriptionDelta::default();
        }

        let old_topics: BTreeSet<&str> = self.effective.iter().map(|p| p.topic.as_str()).collect();
        let mut added_topics = Vec::new();
        let mut seen = BTreeSet::new();
        for payload in &merged {
            if !old_topics.contains(payload.topic.as_str()) && seen.insert(payload.topic.clone()) {
                added_topics.push(payload.topic.clone());
            }
        }

        self.effective = merged;
        SubscriptionDelta {
            changed: true,
            added_topics,
        }
    }

    /// Merge a flat request list into the minimal equivalent set.
    ///
    /// Per topic (first-seen order): within each preload type, an entry
    /// without a field filter subsumes the rest; otherwise field sets
    /// union. An entry whose merged field set is empty is dropped. A
    /// `full` and a `partial` entry may coexist for the same topic; they
    /// serve different consumers and are delivered separately.
    pub fn merge(payloads: &[SubscribePayload]) -> Vec<SubscribePayload> {
        // (whole-message request seen, accumulated fields) per preload type
        #[derive(Default)]
        struct TopicAccum {
            full: Option<(bool, BTreeSet<String>)>,
            partial: Option<(bool, BTreeSet<String>)>,
        }

        let mut order: Vec<String> = Vec::new();
        let mut groups: Vec<TopicAccum> = Vec::new();

        for payload in payloads {
            // An explicitly empty field list requests nothing: a no-op.
            if matches!(&payload.fields, Some(fields) if fields.is_empty()) {
                continue;
            }

            let idx = match order.iter().position(|t| t == &payload.topic) {
                Some(idx) => idx,
                None => {
                    order.push(payload.topic.clone());
                    groups.push(TopicAccum::default());
                    order.len() - 1
                }
            };

            let slot = match payload.preload_type {
                PreloadType::Full => &mut groups[idx].full,
                PreloadType::Partial => &mut groups[idx].partial,
            };
            let (whole, fields) = slot.get_or_insert_with(|| (false, BTreeSet::new()));
            match &payload.fields {
                None => *whole = true,
                Some(requested) => fields.extend(requested.iter().cloned()),
            }
        }

        let mut merged = Vec::new();
        for (topic, accum) in order.into_iter().zip(groups) {
            for (preload_type, slot) in [
                (PreloadType::Full, accum.full),
                (PreloadType::Partial, accum.partial),
            ] {
                if let Some((whole, fields)) = slot {
                    merged.push(SubscribePayload {
                        topic: topic.clone(),
                        preload_type,
                        fields: if whole { None } else { Some(fields) },
                    });
                }
            }
        }
        merged
    }
}

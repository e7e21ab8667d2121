//! In-memory source
//!
//! Reference implementation of [`IterableSource`] over pre-loaded message
//! vectors. Used by the demo binary, by in-process producers, and as the
//! fixture source for the integration suite.

use async_trait::async_trait;
use bagdeck_common::{
    Error, Initialization, MessageEvent, Result, Time, Topic, TopicStats,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{IterableSource, IteratorItem, MessageIteratorArgs, MessageStream};

/// A source backed by in-memory, per-topic sorted message vectors
#[derive(Clone)]
pub struct MemorySource {
    topics: Vec<Topic>,
    /// Per-topic messages, each vector sorted by receive time
    messages: Arc<BTreeMap<String, Vec<MessageEvent>>>,
}

impl MemorySource {
    /// Build a source from a topic list and an unordered message set.
    ///
    /// Messages on topics absent from `topics` are rejected; per-topic
    /// vectors are sorted by receive time on construction.
    pub fn new(topics: Vec<Topic>, messages: Vec<MessageEvent>) -> Result<Self> {
        let mut by_topic: BTreeMap<String, Vec<MessageEvent>> = topics
            .iter()
            .map(|t| (t.name.clone(), Vec::new()))
            .collect();

        for msg in messages {
            match by_topic.get_mut(&msg.topic) {
                Some(list) => list.push(msg),
                None => {
                    return Err(Error::InvalidInput(format!(
                        "Message on undeclared topic: {}",
                        msg.topic
                    )))
                }
            }
        }

        for list in by_topic.values_mut() {
            list.sort_by_key(|m| m.receive_time);
        }

        Ok(MemorySource {
            topics,
            messages: Arc::new(by_topic),
        })
    }

    fn time_range(&self) -> (Time, Time) {
        let mut start = Time::MAX;
        let mut end = Time::ZERO;
        let mut any = false;
        for list in self.messages.values() {
            if let (Some(first), Some(last)) = (list.first(), list.last()) {
                start = start.min(first.receive_time);
                end = end.max(last.receive_time);
                any = true;
            }
        }
        if any {
            (start, end)
        } else {
            (Time::ZERO, Time::ZERO)
        }
    }
}

#[async_trait]
impl IterableSource for MemorySource {
    async fn initialize(&mut self) -> Result<Initialization> {
        let (start, end) = self.time_range();

        let topic_stats = self
            .messages
            .iter()
            .map(|(name, list)| {
                (
                    name.clone(),
                    TopicStats {
                        message_count: list.len() as u64,
                        first_message_time: list.first().map(|m| m.receive_time),
                        last_message_time: list.last().map(|m| m.receive_time),
                    },
                )
            })
            .collect();

        let mut metadata = BTreeMap::new();
        metadata.insert("format".to_string(), "memory".to_string());

        Ok(Initialization {
            start,
            end,
            topics: self.topics.clone(),
            topic_stats,
            datatypes: BTreeMap::new(),
            problems: Vec::new(),
            metadata,
        })
    }

    async fn message_iterator(&mut self, args: MessageIteratorArgs) -> Result<MessageStream> {
        let messages = Arc::clone(&self.messages);

        // Gather the window up front; vectors are sorted so a binary search
        // bounds each topic's slice, then one k-way sort orders the result.
        let mut window: Vec<MessageEvent> = Vec::new();
        for topic in &args.topics {
            if let Some(list) = messages.get(topic) {
                let lo = list.partition_point(|m| m.receive_time < args.start);
                let hi = list.partition_point(|m| m.receive_time < args.end);
                window.extend_from_slice(&list[lo..hi]);
            }
        }
        window.sort_by(|a, b| {
            a.receive_time
                .cmp(&b.receive_time)
                .then_with(|| a.topic.cmp(&b.topic))
        });

        Ok(Box::pin(futures::stream::iter(
            window.into_iter().map(|m| Ok(IteratorItem::Message(m))),
        )))
    }

    async fn backfill_messages(
        &mut self,
        topics: &[String],
        time: Time,
    ) -> Result<Vec<MessageEvent>> {
        // Direct indexed lookup; no need for the default window scan.
        let mut latest: Vec<MessageEvent> = Vec::new();
        for topic in topics {
            if let Some(list) = self.messages.get(topic) {
                let idx = list.partition_point(|m| m.receive_time <= time);
                if idx > 0 {
                    latest.push(list[idx - 1].clone());
                }
            }
        }
        latest.sort_by(|a, b| {
            a.receive_time
                .cmp(&b.receive_time)
                .then_with(|| a.topic.cmp(&b.topic))
        });
        Ok(latest)
    }
}

//! Source trait: the boundary to per-format readers
//!
//! Format decoders (MCAP, ROS bags, live transports) are collaborators
//! that implement [`IterableSource`]. The engine never parses bytes itself;
//! it consumes the trait as a restartable, cancellable asynchronous
//! sequence of time-ordered records.

pub mod memory;

pub use memory::MemorySource;

use async_trait::async_trait;
use bagdeck_common::{Capability, Initialization, MessageEvent, Result, Time};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;

/// Look-behind window used by the default backfill scan
const BACKFILL_LOOK_BEHIND_NANOS: u64 = 60_000_000_000;

/// One record from a source iterator
#[derive(Debug, Clone, PartialEq)]
pub enum IteratorItem {
    /// A recorded message
    Message(MessageEvent),

    /// Read progress marker: the source has read up to this time and found
    /// no further messages yet. Advances the playhead window without
    /// carrying a payload; frequent in sparse regions of a recording.
    Stamp(Time),
}

impl IteratorItem {
    /// Receive time of the record (stamps order like messages)
    pub fn time(&self) -> Time {
        match self {
            IteratorItem::Message(msg) => msg.receive_time,
            IteratorItem::Stamp(t) => *t,
        }
    }
}

/// Parameters for one iteration pass over a source
#[derive(Debug, Clone, PartialEq)]
pub struct MessageIteratorArgs {
    /// Topic names to read; others are skipped at the read layer
    pub topics: Vec<String>,

    /// First time to include
    pub start: Time,

    /// First time to exclude (half-open `[start, end)`)
    pub end: Time,
}

/// Asynchronous sequence of time-ordered records
///
/// Individually non-decreasing in receive time. Dropping the stream cancels
/// the read; sources must tolerate abandonment and a subsequent
/// `message_iterator` call with a new range.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<IteratorItem>> + Send>>;

/// A restartable reader over one backing recording or live transport
#[async_trait]
pub trait IterableSource: Send {
    /// Read the source header: time range, topics, stats, metadata.
    /// Called exactly once per player instance, before any iteration.
    async fn initialize(&mut self) -> Result<Initialization>;

    /// Start a read pass over `[args.start, args.end)` for `args.topics`.
    ///
    /// Valid to call again after a previous stream was dropped mid-read.
    async fn message_iterator(&mut self, args: MessageIteratorArgs) -> Result<MessageStream>;

    /// Latest message per requested topic at-or-before `time`.
    ///
    /// The default scans a bounded look-behind window through
    /// `message_iterator`; indexed sources should override with a direct
    /// lookup.
    async fn backfill_messages(
        &mut self,
        topics: &[String],
        time: Time,
    ) -> Result<Vec<MessageEvent>> {
        let start = time.saturating_sub_nanos(BACKFILL_LOOK_BEHIND_NANOS);
        let mut stream = self
            .message_iterator(MessageIteratorArgs {
                topics: topics.to_vec(),
                start,
                // One nanosecond past `time` so messages stamped exactly at
                // `time` are included.
                end: time.add_nanos(1),
            })
            .await?;

        let mut latest: HashMap<String, MessageEvent> = HashMap::new();
        while let Some(item) = stream.next().await {
            if let IteratorItem::Message(msg) = item? {
                latest.insert(msg.topic.clone(), msg);
            }
        }

        let mut messages: Vec<MessageEvent> = latest.into_values().collect();
        messages.sort_by(|a, b| {
            a.receive_time
                .cmp(&b.receive_time)
                .then_with(|| a.topic.cmp(&b.topic))
        });
        Ok(messages)
    }

    /// Optional operations this source supports. Seekable recordings keep
    /// the default; live transports typically drop `PlaybackControl`.
    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::PlaybackControl, Capability::SetSpeed]
    }
}

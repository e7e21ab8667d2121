//! Synthetic and fault-injecting sources for playback tests

use async_trait::async_trait;
use bagdeck_common::{
    Capability, Error, Initialization, MessageEvent, PlayerConfig, Result, Time, Topic,
};
use bagdeck_player::{IterableSource, MemorySource, MessageIteratorArgs, MessageStream};

/// Fast-ticking configuration with a roomy cache, suitable for driving
/// a whole synthetic recording through in well under a second
pub fn test_config() -> PlayerConfig {
    PlayerConfig {
        tick_interval_ms: 5,
        block_duration_nanos: 1_000_000_000,
        cache_budget_bytes: 64 * 1024 * 1024,
        frame_bytes_cap: 16 * 1024 * 1024,
        look_behind_nanos: 5_000_000_000,
        look_ahead_nanos: 15_000_000_000,
        max_advance_nanos: 1_000_000_000,
    }
}

pub fn message(topic: &str, sec: u32) -> MessageEvent {
    MessageEvent {
        topic: topic.to_string(),
        schema_name: "test/Schema".to_string(),
        receive_time: Time::from_secs(sec),
        message: vec![0u8; 16],
        size_in_bytes: 16,
    }
}

/// `/a` at 1 Hz and `/b` at 0.5 Hz (even seconds only) over
/// [0, duration_secs)
pub fn two_topic_source(duration_secs: u32) -> MemorySource {
    let mut messages = Vec::new();
    for sec in 0..duration_secs {
        messages.push(message("/a", sec));
        if sec % 2 == 0 {
            messages.push(message("/b", sec));
        }
    }
    MemorySource::new(
        vec![
            Topic::new("/a", "test/Schema"),
            Topic::new("/b", "test/Schema"),
        ],
        messages,
    )
    .expect("valid fixture source")
}

/// A source whose initialization always fails
pub struct FailingInitSource;

#[async_trait]
impl IterableSource for FailingInitSource {
    async fn initialize(&mut self) -> Result<Initialization> {
        Err(Error::Source("recording header is corrupt".to_string()))
    }

    async fn message_iterator(&mut self, _args: MessageIteratorArgs) -> Result<MessageStream> {
        Err(Error::Source("source never initialized".to_string()))
    }
}

/// Wraps a [`MemorySource`], failing the first `failures` iterator requests
/// before behaving normally
pub struct FlakyReadSource {
    inner: MemorySource,
    remaining_failures: usize,
}

impl FlakyReadSource {
    pub fn new(inner: MemorySource, failures: usize) -> Self {
        FlakyReadSource {
            inner,
            remaining_failures: failures,
        }
    }
}

#[async_trait]
impl IterableSource for FlakyReadSource {
    async fn initialize(&mut self) -> Result<Initialization> {
        self.inner.initialize().await
    }

    async fn message_iterator(&mut self, args: MessageIteratorArgs) -> Result<MessageStream> {
        if self.remaining_failures > 0 {
            self.remaining_failures -= 1;
            return Err(Error::Source("transient read failure".to_string()));
        }
        self.inner.message_iterator(args).await
    }

    async fn backfill_messages(
        &mut self,
        topics: &[String],
        time: Time,
    ) -> Result<Vec<MessageEvent>> {
        self.inner.backfill_messages(topics, time).await
    }
}

/// Wraps a source with an explicit capability set, for testing how
/// unsupported operations degrade and how live transports behave
pub struct FixedCapabilitySource {
    inner: Box<dyn IterableSource>,
    capabilities: Vec<Capability>,
}

impl FixedCapabilitySource {
    pub fn new(inner: impl IterableSource + 'static, capabilities: Vec<Capability>) -> Self {
        FixedCapabilitySource {
            inner: Box::new(inner),
            capabilities,
        }
    }
}

#[async_trait]
impl IterableSource for FixedCapabilitySource {
    async fn initialize(&mut self) -> Result<Initialization> {
        self.inner.initialize().await
    }

    async fn message_iterator(&mut self, args: MessageIteratorArgs) -> Result<MessageStream> {
        self.inner.message_iterator(args).await
    }

    async fn backfill_messages(
        &mut self,
        topics: &[String],
        time: Time,
    ) -> Result<Vec<MessageEvent>> {
        self.inner.backfill_messages(topics, time).await
    }

    fn capabilities(&self) -> Vec<Capability> {
        self.capabilities.clone()
    }
}

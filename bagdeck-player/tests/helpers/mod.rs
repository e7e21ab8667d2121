//! Test helper modules for bagdeck playback integration tests
//!
//! Provides reusable test infrastructure components:
//! - RecordingListener: capture emitted frames over a channel
//! - Synthetic and fault-injecting sources for driving the engine

pub mod recording;
pub mod sources;

pub use recording::{collect_until, RecordingListener};
pub use sources::{
    test_config, two_topic_source, FailingInitSource, FixedCapabilitySource, FlakyReadSource,
};

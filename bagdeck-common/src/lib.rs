//! # Bagdeck Common Library
//!
//! Shared code for the bagdeck playback engine:
//! - Time and time-range primitives
//! - Message and topic types (the format-agnostic data model)
//! - Subscription payload types
//! - Player state, presence, and problem types
//! - Configuration loading
//! - Error types

pub mod config;
pub mod error;
pub mod messages;
pub mod player;
pub mod subscription;
pub mod time;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use messages::{merge_initializations, Initialization, MessageEvent, Topic, TopicStats};
pub use player::{ActiveData, Capability, PlayerProblem, PlayerState, Presence, ProblemSeverity};
pub use subscription::{PreloadType, SubscribePayload};
pub use time::{Time, TimeRange};

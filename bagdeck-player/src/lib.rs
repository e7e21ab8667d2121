//! # Bagdeck Player Library
//!
//! The playback engine: turns an arbitrarily large, time-ordered,
//! multi-topic recording (or a live transport) into a controllable,
//! seekable stream of typed messages delivered at a virtual clock rate,
//! while bounding memory and I/O.
//!
//! **Architecture:** a single cooperative loop per player instance drives
//! subscription merging, block-cache reads, source fetches for cache gaps,
//! a global time merge, and backpressured frame emission to one listener.
//! Format decoders live behind the [`source::IterableSource`] trait.

pub mod cache;
pub mod controller;
pub mod merge;
pub mod multiplexer;
pub mod player;
pub mod problems;
pub mod source;

pub use bagdeck_common::{Error, Result};
pub use cache::{Block, BlockCache, CacheQuery};
pub use controller::PlaybackController;
pub use merge::merge_streams;
pub use multiplexer::{SubscriberId, SubscriptionDelta, SubscriptionMultiplexer};
pub use player::{Player, PlayerListener};
pub use problems::PlayerProblemManager;
pub use source::{
    IterableSource, IteratorItem, MemorySource, MessageIteratorArgs, MessageStream,
};

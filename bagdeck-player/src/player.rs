//! Player trait: the surface exposed to the panel/UI layer
//!
//! Every method is fire-and-forget: the real effect is observed
//! asynchronously via the next emitted `PlayerState` frame. Unsupported
//! operations are no-ops that surface an info-level problem, never panics.

use async_trait::async_trait;
use bagdeck_common::{PlayerState, SubscribePayload, Time};
use std::collections::BTreeMap;

/// The single registered frame consumer.
///
/// `on_frame` resolving is the backpressure point: the engine never calls it
/// again before the previous call's future resolves.
#[async_trait]
pub trait PlayerListener: Send {
    async fn on_frame(&mut self, state: PlayerState);
}

/// A controllable, seekable message player
pub trait Player: Send {
    /// Register the frame consumer. Only one may be registered at a time;
    /// calling again replaces the previous listener.
    fn set_listener(&self, listener: Box<dyn PlayerListener>);

    /// Replace this consumer's topic/field requests
    fn set_subscriptions(&self, payloads: Vec<SubscribePayload>);

    /// Advertise topics this player would publish on
    fn set_publishers(&self, topics: Vec<String>);

    /// Publish a message back into the session
    fn publish(&self, topic: String, payload: Vec<u8>);

    /// Start advancing the virtual clock
    fn start_playback(&self);

    /// Stop advancing the virtual clock
    fn pause_playback(&self);

    /// Set the virtual-time rate relative to wall clock; must be positive
    fn set_playback_speed(&self, speed: f64);

    /// Jump the playhead; clamped into the source's time range
    fn seek_playback(&self, time: Time);

    /// Re-deliver the latest message per subscribed topic as of the current
    /// time, without advancing it
    fn request_backfill(&self);

    /// Update session-scoped variables shared with panels
    fn set_global_variables(&self, variables: BTreeMap<String, serde_json::Value>);

    /// Stop the playback loop and release the source; idempotent
    fn close(&self);
}

//! Frame-recording listener for integration tests

use async_trait::async_trait;
use bagdeck_common::PlayerState;
use bagdeck_player::PlayerListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Listener that forwards every frame to an unbounded channel, optionally
/// holding each acknowledgement open to exercise engine backpressure.
/// Counts overlapping `on_frame` calls so tests can assert the engine
/// never delivers a frame before the previous one is acknowledged.
pub struct RecordingListener {
    frames: mpsc::UnboundedSender<PlayerState>,
    ack_delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl RecordingListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PlayerState>) {
        Self::with_ack_delay(None)
    }

    /// A listener that sleeps `ack_delay` before acknowledging each frame,
    /// simulating a slow consumer
    pub fn with_ack_delay(
        ack_delay: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<PlayerState>) {
        let (frames, receiver) = mpsc::unbounded_channel();
        (
            RecordingListener {
                frames,
                ack_delay,
                in_flight: Arc::new(AtomicUsize::new(0)),
                peak_in_flight: Arc::new(AtomicUsize::new(0)),
            },
            receiver,
        )
    }

    /// Highest number of `on_frame` calls ever in flight at once; grab the
    /// handle before boxing the listener
    pub fn peak_in_flight(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak_in_flight)
    }
}

#[async_trait]
impl PlayerListener for RecordingListener {
    async fn on_frame(&mut self, state: PlayerState) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.ack_delay {
            tokio::time::sleep(delay).await;
        }
        let _ = self.frames.send(state);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Receive frames until `done` returns true for one, with a hard timeout
/// per frame. Returns every frame received, including the final one.
pub async fn collect_until<F>(
    receiver: &mut mpsc::UnboundedReceiver<PlayerState>,
    mut done: F,
) -> Vec<PlayerState>
where
    F: FnMut(&PlayerState) -> bool,
{
    let mut frames = Vec::new();
    loop {
        let state = tokio::time::timeout(Duration::from_secs(30), receiver.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("player stopped emitting before the expected frame");
        let finished = done(&state);
        frames.push(state);
        if finished {
            return frames;
        }
    }
}

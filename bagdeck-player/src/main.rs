//! bagdeck-play - Demo playback loop over a synthetic in-memory source
//!
//! Generates a few topics of timestamped messages, subscribes to all of
//! them, and plays the whole range to completion, logging one line per
//! emitted frame. Useful for eyeballing playback pacing, seek behavior,
//! and cache hit rates without a real recording on hand.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bagdeck_common::{
    MessageEvent, PlayerConfig, PlayerState, Presence, SubscribePayload, Time, Topic,
};
use bagdeck_player::{MemorySource, PlaybackController, Player, PlayerListener};

/// Command-line arguments for bagdeck-play
#[derive(Parser, Debug)]
#[command(name = "bagdeck-play")]
#[command(about = "Synthetic playback demo for the bagdeck player engine")]
#[command(version)]
struct Args {
    /// Player configuration file (TOML)
    #[arg(short, long, env = "BAGDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Playback speed relative to wall clock
    #[arg(short, long, default_value = "2.0")]
    speed: f64,

    /// Length of the synthetic recording, in seconds
    #[arg(short, long, default_value = "30")]
    duration: u32,

    /// Number of synthetic topics to generate
    #[arg(short, long, default_value = "3")]
    topics: usize,
}

/// Forwards every frame to the main task over a channel
struct ChannelListener {
    frames: mpsc::Sender<PlayerState>,
}

#[async_trait]
impl PlayerListener for ChannelListener {
    async fn on_frame(&mut self, state: PlayerState) {
        // An unconsumed channel applies backpressure to the engine, which
        // is exactly the contract a real UI would have
        let _ = self.frames.send(state).await;
    }
}

/// One message per topic per second over [0, duration)
fn synthetic_source(duration_secs: u32, topic_count: usize) -> Result<MemorySource> {
    let topics: Vec<Topic> = (0..topic_count)
        .map(|i| Topic::new(format!("/demo/{}", i), "demo/Sample"))
        .collect();
    let mut messages = Vec::new();
    for sec in 0..duration_secs {
        for topic in &topics {
            let payload =
                format!("{{\"topic\":\"{}\",\"sec\":{}}}", topic.name, sec).into_bytes();
            messages.push(MessageEvent {
                topic: topic.name.clone(),
                schema_name: "demo/Sample".to_string(),
                receive_time: Time::from_secs(sec),
                size_in_bytes: payload.len() as u64,
                message: payload,
            });
        }
    }
    MemorySource::new(topics, messages).context("Failed to build synthetic source")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bagdeck_play=info,bagdeck_player=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = PlayerConfig::load(args.config.as_deref())
        .context("Failed to load player configuration")?;

    info!(
        duration = args.duration,
        topics = args.topics,
        speed = args.speed,
        "Starting synthetic playback"
    );

    let source = synthetic_source(args.duration, args.topics)?;
    let player = PlaybackController::new(Box::new(source), config);

    let (frames_tx, mut frames_rx) = mpsc::channel(1);
    player.set_listener(Box::new(ChannelListener { frames: frames_tx }));
    player.set_subscriptions(
        (0..args.topics)
            .map(|i| SubscribePayload::full(format!("/demo/{}", i)))
            .collect(),
    );
    player.set_playback_speed(args.speed);
    player.start_playback();

    let mut frame_count = 0u64;
    let mut message_count = 0u64;
    while let Some(state) = frames_rx.recv().await {
        frame_count += 1;

        if state.presence == Presence::Error {
            for problem in &state.problems {
                anyhow::bail!("Playback failed: {}", problem.message);
            }
            anyhow::bail!("Playback failed");
        }

        let Some(active) = state.active_data else {
            continue;
        };
        message_count += active.messages.len() as u64;
        debug!(
            frame = frame_count,
            messages = active.messages.len(),
            "playhead at {}",
            active.current_time
        );

        // One line of per-topic counts at each whole second of virtual time
        if active.current_time.nsec == 0 || !active.is_playing {
            let mut per_topic: BTreeMap<&str, usize> = BTreeMap::new();
            for message in &active.messages {
                *per_topic.entry(message.topic.as_str()).or_default() += 1;
            }
            info!(
                "t={} playing={} frame_messages={:?}",
                active.current_time, active.is_playing, per_topic
            );
        }

        if !active.is_playing && active.current_time >= active.end_time {
            info!(
                frames = frame_count,
                messages = message_count,
                "Playback complete"
            );
            break;
        }
    }

    player.close();
    Ok(())
}

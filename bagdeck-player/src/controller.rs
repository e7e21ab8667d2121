//! Playback controller: the player state machine
//!
//! One cooperative loop per player instance. The loop owns the virtual
//! clock, the block cache, the subscription multiplexer, and the problem
//! manager; callers reach it through a command channel, and every effect
//! surfaces as the next emitted `PlayerState` frame.
//!
//! Suspension points: waiting for the source to yield records, waiting for
//! the listener to acknowledge the previous frame (the backpressure point),
//! and the command channel itself. In-flight reads race the command channel
//! so a new seek cancels them promptly; results from a superseded seek
//! generation are never emitted.

use bagdeck_common::{
    ActiveData, Capability, Error, MessageEvent, PlayerConfig, PlayerProblem, PlayerState,
    Presence, Result, SubscribePayload, Time, TimeRange,
};
use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::BlockCache;
use crate::merge::merge_streams;
use crate::multiplexer::{SubscriberId, SubscriptionMultiplexer};
use crate::player::{Player, PlayerListener};
use crate::problems::PlayerProblemManager;
use crate::source::{IterableSource, IteratorItem, MessageIteratorArgs, MessageStream};

/// Control messages from the `Player` surface into the loop
enum Command {
    SetListener(Box<dyn PlayerListener>),
    SetSubscriptions(Vec<SubscribePayload>),
    SetPublishers(Vec<String>),
    Publish,
    StartPlayback,
    PausePlayback,
    SetPlaybackSpeed(f64),
    SeekPlayback(Time),
    RequestBackfill,
    SetGlobalVariables(BTreeMap<String, serde_json::Value>),
    Close,
}

/// Outcome of one raced source read
enum ReadOutcome {
    Complete(Vec<MessageEvent>),
    /// A seek or close arrived mid-read; the partial result is discarded
    Superseded,
    Failed(Error),
}

/// Handle to a running playback loop
///
/// Constructed per data-source selection; dropping it (or calling `close`)
/// stops the loop and releases the source and cache.
pub struct PlaybackController {
    commands: mpsc::UnboundedSender<Command>,
}

impl PlaybackController {
    /// Spawn the playback loop for `source` with explicit configuration
    pub fn new(source: Box<dyn IterableSource>, config: PlayerConfig) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let player_loop = PlayerLoop::new(source, config, command_rx);
        tokio::spawn(player_loop.run());
        PlaybackController { commands }
    }

    fn send(&self, command: Command) {
        // A closed loop means the player was already shut down; commands
        // after close are defined as no-ops.
        let _ = self.commands.send(command);
    }
}

impl Player for PlaybackController {
    fn set_listener(&self, listener: Box<dyn PlayerListener>) {
        self.send(Command::SetListener(listener));
    }

    fn set_subscriptions(&self, payloads: Vec<SubscribePayload>) {
        self.send(Command::SetSubscriptions(payloads));
    }

    fn set_publishers(&self, topics: Vec<String>) {
        self.send(Command::SetPublishers(topics));
    }

    fn publish(&self, _topic: String, _payload: Vec<u8>) {
        self.send(Command::Publish);
    }

    fn start_playback(&self) {
        self.send(Command::StartPlayback);
    }

    fn pause_playback(&self) {
        self.send(Command::PausePlayback);
    }

    fn set_playback_speed(&self, speed: f64) {
        self.send(Command::SetPlaybackSpeed(speed));
    }

    fn seek_playback(&self, time: Time) {
        self.send(Command::SeekPlayback(time));
    }

    fn request_backfill(&self) {
        self.send(Command::RequestBackfill);
    }

    fn set_global_variables(&self, variables: BTreeMap<String, serde_json::Value>) {
        self.send(Command::SetGlobalVariables(variables));
    }

    fn close(&self) {
        self.send(Command::Close);
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}

/// Loop-owned playback state
struct PlayerLoop {
    source: Box<dyn IterableSource>,
    config: PlayerConfig,
    command_rx: mpsc::UnboundedReceiver<Command>,

    /// Commands picked up while racing an in-flight read; replayed before
    /// any new work
    deferred: VecDeque<Command>,

    presence: Presence,
    capabilities: BTreeSet<Capability>,
    start: Time,
    end: Time,
    current: Time,
    speed: f64,
    is_playing: bool,

    /// Monotonic fence; bumped on every seek. Reads capture it when issued
    /// and their results are discarded if it moved.
    seek_generation: u64,

    multiplexer: SubscriptionMultiplexer,
    subscriber: SubscriberId,
    cache: Option<BlockCache>,
    problems: PlayerProblemManager,
    listener: Option<Box<dyn PlayerListener>>,
    global_variables: BTreeMap<String, serde_json::Value>,

    last_tick: Option<Instant>,
    emit_needed: bool,
    closed: bool,
}

impl PlayerLoop {
    fn new(
        source: Box<dyn IterableSource>,
        config: PlayerConfig,
        command_rx: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        PlayerLoop {
            source,
            config,
            command_rx,
            deferred: VecDeque::new(),
            presence: Presence::Constructing,
            capabilities: BTreeSet::new(),
            start: Time::ZERO,
            end: Time::ZERO,
            current: Time::ZERO,
            speed: 1.0,
            is_playing: false,
            seek_generation: 0,
            multiplexer: SubscriptionMultiplexer::new(),
            subscriber: SubscriberId::new(),
            cache: None,
            problems: PlayerProblemManager::new(),
            listener: None,
            global_variables: BTreeMap::new(),
            last_tick: None,
            emit_needed: false,
            closed: false,
        }
    }

    async fn run(mut self) {
        self.initialize().await;

        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.closed {
            if let Some(command) = self.deferred.pop_front() {
                self.handle_command(command).await;
                continue;
            }
            if self.emit_needed {
                self.emit_frame(Vec::new()).await;
                continue;
            }

            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // Every handle dropped; shut down silently
                    None => break,
                },
                _ = ticker.tick(), if self.is_playing
                    && matches!(self.presence, Presence::Present | Presence::Reconnecting) =>
                {
                    self.tick().await;
                }
            }
        }

        debug!("playback loop stopped");
    }

    async fn initialize(&mut self) {
        self.presence = Presence::Initializing;
        info!("initializing source");

        match self.source.initialize().await {
            Ok(init) => {
                self.start = init.start;
                self.end = init.end;
                self.current = init.start;
                self.capabilities = self.source.capabilities().into_iter().collect();
                if !self.capabilities.contains(&Capability::PlaybackControl) {
                    // A live transport has no transport position to hold;
                    // its clock runs from the moment the source is ready.
                    info!("source has no playback control; clock runs continuously");
                    self.is_playing = true;
                }
                for (idx, problem) in init.problems.into_iter().enumerate() {
                    self.problems.add_problem(format!("init:{}", idx), problem);
                }
                self.cache = Some(BlockCache::new(
                    init.start,
                    init.end,
                    self.config.block_duration_nanos,
                    self.config.cache_budget_bytes,
                    self.config.look_behind_nanos,
                    self.config.look_ahead_nanos,
                ));
                self.presence = Presence::Present;
                info!(
                    topics = init.topics.len(),
                    "source initialized over [{}, {}]", self.start, self.end
                );
            }
            Err(err) => {
                error!("source initialization failed: {}", err);
                self.problems.add_problem(
                    "initialize",
                    PlayerProblem::error("Failed to initialize source").with_error(err),
                );
                self.presence = Presence::Error;
            }
        }
        self.emit_needed = true;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetListener(listener) => {
                self.listener = Some(listener);
                self.emit_needed = true;
            }
            Command::SetSubscriptions(payloads) => self.handle_set_subscriptions(payloads).await,
            Command::SetPublishers(_) | Command::Publish => {
                if !self.capabilities.contains(&Capability::Publish) {
                    self.problems.add_problem(
                        "publish",
                        PlayerProblem::info("Source does not support publishing"),
                    );
                    self.emit_needed = true;
                }
            }
            Command::StartPlayback => self.handle_start(),
            Command::PausePlayback => self.handle_pause(),
            Command::SetPlaybackSpeed(speed) => self.handle_set_speed(speed),
            Command::SeekPlayback(time) => self.handle_seek(time).await,
            Command::RequestBackfill => self.handle_request_backfill().await,
            Command::SetGlobalVariables(variables) => {
                if !self.capabilities.contains(&Capability::GlobalVariables) {
                    self.problems.add_problem(
                        "global-variables",
                        PlayerProblem::info("Source does not support global variables"),
                    );
                    self.emit_needed = true;
                } else {
                    debug!(count = variables.len(), "global variables updated");
                    self.global_variables = variables;
                }
            }
            Command::Close => self.handle_close().await,
        }
    }

    fn handle_start(&mut self) {
        if !self.capabilities.contains(&Capability::PlaybackControl) {
            self.problems.add_problem(
                "playback-control",
                PlayerProblem::info("Source does not support playback control"),
            );
            self.emit_needed = true;
            return;
        }
        if !self.is_playing {
            info!(speed = self.speed, "playback started at {}", self.current);
            self.is_playing = true;
            self.last_tick = None;
            self.emit_needed = true;
        }
    }

    fn handle_pause(&mut self) {
        if !self.capabilities.contains(&Capability::PlaybackControl) {
            self.problems.add_problem(
                "playback-control",
                PlayerProblem::info("Source does not support playback control"),
            );
            self.emit_needed = true;
            return;
        }
        if self.is_playing {
            info!("playback paused at {}", self.current);
            self.is_playing = false;
            self.emit_needed = true;
        }
    }

    fn handle_set_speed(&mut self, speed: f64) {
        if !self.capabilities.contains(&Capability::SetSpeed) {
            self.problems.add_problem(
                "set-speed",
                PlayerProblem::info("Source does not support adjustable playback speed"),
            );
            self.emit_needed = true;
            return;
        }
        if !(speed.is_finite() && speed > 0.0) {
            self.problems.add_problem(
                "set-speed",
                PlayerProblem::info(format!("Ignoring invalid playback speed {}", speed)),
            );
            self.emit_needed = true;
            return;
        }
        debug!(speed, "playback speed changed");
        self.speed = speed;
        self.emit_needed = true;
    }

    async fn handle_set_subscriptions(&mut self, payloads: Vec<SubscribePayload>) {
        let delta = self.multiplexer.set_subscriptions(self.subscriber, payloads);
        if !delta.changed {
            return;
        }
        debug!(added = ?delta.added_topics, "effective subscriptions changed");

        if !matches!(self.presence, Presence::Present | Presence::Reconnecting) {
            self.emit_needed = true;
            return;
        }

        // Only the newly added topics need state; cached blocks for
        // surviving topics remain valid.
        let mut messages = Vec::new();
        if !delta.added_topics.is_empty() {
            match self.backfill_raced(&delta.added_topics, self.current).await {
                Some(Ok(backfilled)) => {
                    self.problems.remove_problem("backfill");
                    messages = backfilled;
                }
                Some(Err(err)) => self.note_backfill_failure(err),
                None => return, // superseded; the newer command re-emits
            }
        }
        self.emit_frame(messages).await;
    }

    async fn handle_seek(&mut self, target: Time) {
        if !matches!(self.presence, Presence::Present | Presence::Reconnecting) {
            self.problems.add_problem(
                "seek-unavailable",
                PlayerProblem::info("Cannot seek before the source is ready"),
            );
            self.emit_needed = true;
            return;
        }
        if !self.capabilities.contains(&Capability::PlaybackControl) {
            self.problems.add_problem(
                "playback-control",
                PlayerProblem::info("Source does not support seeking"),
            );
            self.emit_needed = true;
            return;
        }

        let clamped = target.clamp_to(self.start, self.end);
        if clamped != target {
            self.problems.add_problem(
                "seek-range",
                PlayerProblem::info(format!(
                    "Seek to {} is outside [{}, {}]; clamped to {}",
                    target, self.start, self.end, clamped
                )),
            );
        }

        self.seek_generation += 1;
        let generation = self.seek_generation;
        self.current = clamped;
        self.last_tick = None;
        if let Some(cache) = self.cache.as_mut() {
            cache.set_playhead(clamped);
        }
        info!(generation, "seek to {}", clamped);

        let topics = self.multiplexer.topics();
        let mut messages = Vec::new();
        if !topics.is_empty() {
            match self.backfill_raced(&topics, clamped).await {
                Some(Ok(backfilled)) => {
                    self.problems.remove_problem("backfill");
                    messages = backfilled;
                }
                Some(Err(err)) => self.note_backfill_failure(err),
                None => return, // a newer seek owns the next frame
            }
        }

        // Fence: emit only if no newer seek superseded this one
        if self.seek_generation != generation || self.closed {
            return;
        }
        self.emit_frame(messages).await;
    }

    async fn handle_request_backfill(&mut self) {
        if !matches!(self.presence, Presence::Present | Presence::Reconnecting) {
            return;
        }
        let topics = self.multiplexer.topics();
        let mut messages = Vec::new();
        if !topics.is_empty() {
            match self.backfill_raced(&topics, self.current).await {
                Some(Ok(backfilled)) => {
                    self.problems.remove_problem("backfill");
                    messages = backfilled;
                }
                Some(Err(err)) => self.note_backfill_failure(err),
                None => return,
            }
        }
        self.emit_frame(messages).await;
    }

    async fn handle_close(&mut self) {
        if self.closed {
            return;
        }
        info!("closing player");
        self.closed = true;
        self.presence = Presence::NotPresent;
        self.is_playing = false;
        self.cache = None;
        self.emit_frame(Vec::new()).await;
        self.listener = None;
        // The source itself is released when the loop drops
    }

    fn note_backfill_failure(&mut self, err: Error) {
        warn!("backfill failed: {}", err);
        self.problems.add_problem(
            "backfill",
            PlayerProblem::warn("Failed to backfill latest messages").with_error(err),
        );
    }

    /// One steady-state playback step: advance the virtual clock, fill
    /// cache gaps from the source, merge, cap, emit.
    async fn tick(&mut self) {
        let generation = self.seek_generation;

        if self.current >= self.end {
            info!("reached end of source at {}", self.end);
            self.is_playing = false;
            self.emit_frame(Vec::new()).await;
            return;
        }

        let now = Instant::now();
        let wall_delta = match self.last_tick.replace(now) {
            Some(previous) => now.duration_since(previous),
            None => Duration::from_millis(self.config.tick_interval_ms),
        };
        let advance = ((wall_delta.as_nanos() as f64 * self.speed) as u64)
            .clamp(1, self.config.max_advance_nanos);

        let window_end = self.current.add_nanos(advance).min(self.end);
        // `current` was already delivered; read the half-open window
        // (current, window_end]
        let read_range = TimeRange::new(self.current.add_nanos(1), window_end.add_nanos(1));
        let topics = self.multiplexer.topics();

        let mut window_messages = Vec::new();
        if !topics.is_empty() && !read_range.is_empty() {
            match self.fetch_window(read_range, &topics).await {
                Some(messages) => window_messages = messages,
                None => return, // superseded mid-read; nothing is emitted
            }
        }

        // Stale-read fence: a deferred seek may not land until after this
        // tick, but nothing read for an old generation may be emitted.
        if self.seek_generation != generation || self.closed {
            return;
        }

        let (delivered, frame_end) =
            truncate_to_cap(window_messages, window_end, self.config.frame_bytes_cap);
        self.current = frame_end;
        if let Some(cache) = self.cache.as_mut() {
            cache.set_playhead(frame_end);
        }
        if self.current >= self.end {
            info!("reached end of source at {}", self.end);
            self.is_playing = false;
        }

        self.emit_frame(delivered).await;
    }

    /// Resolve one window: cached blocks answer directly, gaps are read
    /// from the source and inserted, then everything merges in time order.
    /// Returns `None` when a superseding command aborted the reads.
    async fn fetch_window(
        &mut self,
        range: TimeRange,
        topics: &[String],
    ) -> Option<Vec<MessageEvent>> {
        let misses = match self.cache.as_mut() {
            Some(cache) => cache.query(range, topics).misses,
            None => return Some(Vec::new()),
        };

        for miss in misses {
            match self.read_source(miss, topics).await {
                ReadOutcome::Complete(messages) => {
                    if let Some(cache) = self.cache.as_mut() {
                        cache.insert(miss, topics, messages);
                    }
                    self.problems.remove_problem(&read_problem_key(&miss));
                    if self.presence == Presence::Reconnecting {
                        info!("source recovered");
                        self.presence = Presence::Present;
                    }
                }
                ReadOutcome::Superseded => return None,
                ReadOutcome::Failed(err) => {
                    // Transient: keyed by the failing range so retries
                    // overwrite instead of accumulating
                    warn!("read failed for {}: {}", miss, err);
                    self.problems.add_problem(
                        read_problem_key(&miss),
                        PlayerProblem::warn(format!("Failed to read {}", miss)).with_error(err),
                    );
                    if !self.capabilities.contains(&Capability::PlaybackControl) {
                        self.presence = Presence::Reconnecting;
                    }
                }
            }
        }

        let hits = match self.cache.as_mut() {
            Some(cache) => cache.query(range, topics).hits,
            None => return Some(Vec::new()),
        };

        // One stream per topic, concatenated across blocks (blocks are
        // time-ordered and disjoint, so per-topic order is preserved),
        // merged globally with ties broken by subscription order.
        let mut per_topic: Vec<Vec<MessageEvent>> = vec![Vec::new(); topics.len()];
        for block in hits {
            for (idx, topic) in topics.iter().enumerate() {
                if let Some(list) = block.messages_by_topic.get(topic) {
                    per_topic[idx]
                        .extend(list.iter().filter(|m| range.contains(m.receive_time)).cloned());
                }
            }
        }
        let streams: Vec<MessageStream> = per_topic
            .into_iter()
            .map(|messages| -> MessageStream {
                Box::pin(futures::stream::iter(
                    messages.into_iter().map(|m| Ok(IteratorItem::Message(m))),
                ))
            })
            .collect();

        let mut merged = merge_streams(streams);
        let mut ordered = Vec::new();
        while let Some(item) = merged.next().await {
            if let Ok(IteratorItem::Message(message)) = item {
                ordered.push(message);
            }
        }
        Some(ordered)
    }

    /// Collect one source read while racing the command channel, so a seek
    /// or close cancels the read promptly (the dropped stream is the
    /// cancellation token).
    async fn read_source(&mut self, range: TimeRange, topics: &[String]) -> ReadOutcome {
        let args = MessageIteratorArgs {
            topics: topics.to_vec(),
            start: range.start,
            end: range.end,
        };
        let mut stream = match self.source.message_iterator(args).await {
            Ok(stream) => stream,
            Err(err) => return ReadOutcome::Failed(err),
        };

        let mut messages = Vec::new();
        loop {
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(command) => {
                        let superseding =
                            matches!(command, Command::SeekPlayback(_) | Command::Close);
                        self.deferred.push_back(command);
                        if superseding {
                            return ReadOutcome::Superseded;
                        }
                    }
                    None => {
                        self.closed = true;
                        return ReadOutcome::Superseded;
                    }
                },
                item = stream.next() => match item {
                    Some(Ok(IteratorItem::Message(message))) => messages.push(message),
                    Some(Ok(IteratorItem::Stamp(_))) => {}
                    Some(Err(err)) => return ReadOutcome::Failed(err),
                    None => return ReadOutcome::Complete(messages),
                },
            }
        }
    }

    /// Run a backfill read racing the command channel; `None` means a
    /// superseding command arrived and the result was discarded.
    async fn backfill_raced(
        &mut self,
        topics: &[String],
        time: Time,
    ) -> Option<Result<Vec<MessageEvent>>> {
        let fut = self.source.backfill_messages(topics, time);
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                command = self.command_rx.recv() => match command {
                    Some(command) => {
                        let superseding =
                            matches!(command, Command::SeekPlayback(_) | Command::Close);
                        self.deferred.push_back(command);
                        if superseding {
                            return None;
                        }
                    }
                    None => {
                        self.closed = true;
                        return None;
                    }
                },
                result = &mut fut => return Some(result),
            }
        }
    }

    async fn emit_frame(&mut self, messages: Vec<MessageEvent>) {
        self.emit_needed = false;
        let state = self.build_state(messages);
        if let Some(listener) = self.listener.as_mut() {
            // Backpressure point: frame N+1 is not produced until frame N's
            // acknowledgement resolves.
            listener.on_frame(state).await;
        }
    }

    fn build_state(&mut self, messages: Vec<MessageEvent>) -> PlayerState {
        let active_data = match self.presence {
            Presence::Present | Presence::Reconnecting => Some(ActiveData {
                current_time: self.current,
                start_time: self.start,
                end_time: self.end,
                is_playing: self.is_playing,
                speed: self.speed,
                seek_generation: self.seek_generation,
                messages,
            }),
            // Error presence only arises from initialization, before any
            // transport state exists
            _ => None,
        };

        PlayerState {
            presence: self.presence,
            capabilities: self.capabilities.clone(),
            progress: self
                .cache
                .as_ref()
                .map(BlockCache::progress)
                .unwrap_or_default(),
            active_data,
            problems: self.problems.problems().to_vec(),
        }
    }
}

fn read_problem_key(range: &TimeRange) -> String {
    format!("read:{}", range)
}

/// Enforce the per-frame byte ceiling by shrinking the time advance.
///
/// Walks the merged window in time order; once the ceiling would be
/// crossed, delivery cuts at the previous timestamp so equal-time groups
/// never split across frames and nothing is dropped. At least one timestamp
/// group is always delivered so playback makes progress.
fn truncate_to_cap(
    messages: Vec<MessageEvent>,
    window_end: Time,
    cap_bytes: u64,
) -> (Vec<MessageEvent>, Time) {
    let mut bytes = 0u64;
    let mut delivered: Vec<MessageEvent> = Vec::with_capacity(messages.len());

    for message in messages {
        if bytes.saturating_add(message.size_in_bytes) > cap_bytes {
            if let Some(last) = delivered.last() {
                if message.receive_time > last.receive_time {
                    let frame_end = last.receive_time;
                    return (delivered, frame_end);
                }
            }
        }
        bytes = bytes.saturating_add(message.size_in_bytes);
        delivered.push(message);
    }

    (delivered, window_end)
}

//! Player state types
//!
//! The frame a player emits to its listener: coarse presence, transport
//! state, delivered messages, load progress, and non-fatal problems.

use crate::messages::MessageEvent;
use crate::time::{Time, TimeRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Coarse connectivity/lifecycle state of a player
///
/// Transitions once through `Constructing → Initializing → Present` (or
/// `Error`); `Reconnecting` may bounce back to `Present` for live sources;
/// `NotPresent` is the post-close resting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Constructing,
    Initializing,
    Present,
    Reconnecting,
    Error,
    NotPresent,
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Presence::Constructing => "constructing",
            Presence::Initializing => "initializing",
            Presence::Present => "present",
            Presence::Reconnecting => "reconnecting",
            Presence::Error => "error",
            Presence::NotPresent => "not-present",
        };
        write!(f, "{}", s)
    }
}

/// Optional operations a source supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Play, pause, and seek (absent on live, non-seekable transports)
    PlaybackControl,
    /// Adjustable playback rate
    SetSpeed,
    /// Publishing back into the session
    Publish,
    /// Session-scoped variables shared with panels
    GlobalVariables,
}

/// Severity of a non-fatal player problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemSeverity {
    Info,
    Warn,
    Error,
}

/// A non-fatal problem surfaced to the UI without interrupting playback
///
/// Problems are keyed by an id chosen by the producer; re-adding the same id
/// overwrites. Severity is advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerProblem {
    pub severity: ProblemSeverity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlayerProblem {
    pub fn info(message: impl Into<String>) -> Self {
        PlayerProblem {
            severity: ProblemSeverity::Info,
            message: message.into(),
            tip: None,
            error: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        PlayerProblem {
            severity: ProblemSeverity::Warn,
            message: message.into(),
            tip: None,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        PlayerProblem {
            severity: ProblemSeverity::Error,
            message: message.into(),
            tip: None,
            error: None,
        }
    }

    pub fn with_tip(mut self, tip: impl Into<String>) -> Self {
        self.tip = Some(tip.into());
        self
    }

    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// One frame's worth of delivered messages plus transport state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveData {
    /// Playhead position for this frame
    pub current_time: Time,

    /// Earliest time in the source
    pub start_time: Time,

    /// Latest time in the source
    pub end_time: Time,

    /// Whether the virtual clock is advancing
    pub is_playing: bool,

    /// Playback rate relative to recording time
    pub speed: f64,

    /// Monotonic seek counter; strictly increases across every seek so
    /// consumers can fence stale state without comparing wall clocks
    pub seek_generation: u64,

    /// Messages delivered in this frame, globally ordered by receive time
    pub messages: Vec<MessageEvent>,
}

/// The frame a player emits to its registered listener
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerState {
    pub presence: Presence,
    pub capabilities: BTreeSet<Capability>,

    /// Per-topic ranges already resident in the block cache
    pub progress: BTreeMap<String, Vec<TimeRange>>,

    /// Transport state and delivered messages; `None` before initialization
    pub active_data: Option<ActiveData>,

    /// Snapshot of live problems, ordered by insertion
    pub problems: Vec<PlayerProblem>,
}

impl Default for Presence {
    fn default() -> Self {
        Presence::Constructing
    }
}

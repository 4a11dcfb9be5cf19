//! Player module for trackdeck
//!
//! This module holds the playback core: the state machine, the event hub,
//! the queue, the single render engine, the crossfade controller that owns
//! two engines, and the `MediaPlayer` command surface on top of them.

pub mod command;
mod controller;
mod engine;
mod events;
mod media_player;
mod queue;
mod state;

pub use controller::{CrossfadeController, CrossfadeTarget, SessionSink, SwapOutcome, TransportControls};
pub use engine::{LoadStatus, RenderEngine};
pub use events::{
    CallbackSubscription, DiscontinuityReason, EventHub, EventKind, PlayWhenReadyReason, PlayerEvent, Subscription,
    TransitionReason,
};
pub use media_player::{MediaPlayer, MediaPlayerBuilder};
pub use queue::{CurrentChange, Queue, QueueManager, RemoveOutcome, Step};
pub use state::{StateMachine, StateTransition};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackState {
    /// Nothing loaded, or the source was cleared
    Idle,

    /// A new item is being opened
    Loading,

    /// Waiting for enough buffered data
    Buffering,

    /// Enough data is buffered to play
    Ready,

    /// Audio is actually being produced
    Playing,

    /// Play-when-ready is off
    Paused,

    /// Explicitly stopped; sticky until play or load
    Stopped,

    /// The queue ran out
    Ended,

    /// Unrecoverable renderer error; cleared by retry or reload
    Error,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Ready => "ready",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Ended => "ended",
            PlaybackState::Error => "error",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repeat mode for the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// Stop at the end of the queue
    #[default]
    Off,

    /// Repeat the current item
    Track,

    /// Wrap around to the start of the queue
    Queue,
}

/// Slot of an engine inside the crossfade pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct EngineId(pub usize);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine-{}", self.0)
    }
}

/// Read-only view of the player, computed on demand from the active engine
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    pub position: Duration,
    pub duration: Option<Duration>,
    pub buffered_position: Duration,
    /// Caller-set base volume
    pub volume: f32,
    pub playback_speed: f32,
    pub current_index: Option<usize>,
    pub repeat_mode: RepeatMode,
    pub play_when_ready: bool,
}

impl PlayerSnapshot {
    /// Current index in bridge form, `-1` when nothing is selected
    pub fn current_index_raw(&self) -> i64 {
        self.current_index.map_or(-1, |index| index as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(PlaybackState::Buffering.to_string(), "buffering");
        assert_eq!(EngineId(1).to_string(), "engine-1");
    }

    #[test]
    fn test_repeat_mode_serde() {
        let mode: RepeatMode = serde_json::from_str("\"queue\"").unwrap();
        assert_eq!(mode, RepeatMode::Queue);
        assert_eq!(RepeatMode::default(), RepeatMode::Off);
    }

    #[test]
    fn test_snapshot_raw_index() {
        let mut snapshot = PlayerSnapshot {
            state: PlaybackState::Idle,
            position: Duration::ZERO,
            duration: None,
            buffered_position: Duration::ZERO,
            volume: 1.0,
            playback_speed: 1.0,
            current_index: None,
            repeat_mode: RepeatMode::Off,
            play_when_ready: false,
        };
        assert_eq!(snapshot.current_index_raw(), -1);
        snapshot.current_index = Some(3);
        assert_eq!(snapshot.current_index_raw(), 3);
    }
}

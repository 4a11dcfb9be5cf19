//! Playback state machine for trackdeck
//!
//! Transitions arrive from two places: translated renderer callbacks
//! ([`StateMachine::apply`]) and explicit commands
//! ([`StateMachine::force`]). Both de-duplicate, so the same state is never
//! reported twice in a row.

use crate::player::PlaybackState;
use log::debug;

/// A state change that actually happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub previous: PlaybackState,
    pub state: PlaybackState,
}

/// Lifecycle state of one engine
#[derive(Debug, Clone)]
pub struct StateMachine {
    current: PlaybackState,
    label: String,
}

impl StateMachine {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            current: PlaybackState::Idle,
            label: label.into(),
        }
    }

    pub fn current(&self) -> PlaybackState {
        self.current
    }

    /// Apply a state reported by the renderer
    ///
    /// Stopped is sticky: the renderer going idle or dropping
    /// play-when-ready cannot leave it. Error only clears to Idle through
    /// an explicit retry or reload.
    pub fn apply(&mut self, next: PlaybackState) -> Option<StateTransition> {
        let suppressed = match (self.current, next) {
            (PlaybackState::Stopped, PlaybackState::Idle | PlaybackState::Paused) => true,
            (PlaybackState::Error, PlaybackState::Idle) => true,
            _ => false,
        };
        if suppressed {
            debug!("{}: suppressed {} while {}", self.label, next, self.current);
            return None;
        }
        self.enter(next)
    }

    /// Apply a state set by an explicit command (stop, load, retry)
    pub fn force(&mut self, next: PlaybackState) -> Option<StateTransition> {
        self.enter(next)
    }

    fn enter(&mut self, next: PlaybackState) -> Option<StateTransition> {
        if next == self.current {
            return None;
        }
        let transition = StateTransition {
            previous: self.current,
            state: next,
        };
        debug!("{}: {} -> {}", self.label, self.current, next);
        self.current = next;
        Some(transition)
    }
}

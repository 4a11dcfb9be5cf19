//! Audio focus arbitration
//!
//! The host platform decides who may produce sound. This module asks it for
//! focus, gives it back, and turns the platform's interruption signals into
//! actions on the active engine.

use crate::player::{EventHub, PlaybackState, PlayerEvent};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Answer of the platform to a focus request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusGrant {
    Granted,
    Denied,
}

/// Focus signal delivered by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Gain,
    /// Short interruption, such as a notification or call
    LossTransient,
    /// Short interruption that tolerates quieter output
    LossTransientCanDuck,
    /// Another application took over
    Loss,
}

/// What the active engine should do in response to a focus decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusAction {
    None,
    Duck,
    Pause,
    Restore { unduck: bool, resume: bool },
}

/// Focus-grant capability of the host platform
pub trait FocusPlatform: Send + Sync {
    fn request_focus(&self) -> FocusGrant;
    fn abandon_focus(&self);
}

/// Platform that always grants focus
#[derive(Debug, Default, Clone, Copy)]
pub struct GrantAllFocus;

impl FocusPlatform for GrantAllFocus {
    fn request_focus(&self) -> FocusGrant {
        FocusGrant::Granted
    }

    fn abandon_focus(&self) {}
}

#[derive(Debug, Default)]
struct FocusState {
    held: bool,
    ducked: bool,
    paused: bool,
}

/// Focus controller shared by both engines
pub struct FocusController {
    platform: Arc<dyn FocusPlatform>,
    automatic: bool,
    always_pause_on_interruption: bool,
    state: Mutex<FocusState>,
    hub: EventHub,
}

impl FocusController {
    pub fn new(platform: Arc<dyn FocusPlatform>, automatic: bool, always_pause_on_interruption: bool, hub: EventHub) -> Self {
        Self {
            platform,
            automatic,
            always_pause_on_interruption,
            state: Mutex::new(FocusState::default()),
            hub,
        }
    }

    /// Whether focus is requested and abandoned by the core itself
    pub fn is_automatic(&self) -> bool {
        self.automatic
    }

    pub fn is_held(&self) -> bool {
        self.state.lock().held
    }

    /// Ask the platform for focus; a no-op while focus is held
    pub fn request_focus(&self) -> FocusGrant {
        let mut state = self.state.lock();
        if state.held {
            return FocusGrant::Granted;
        }

        let grant = self.platform.request_focus();
        state.held = grant == FocusGrant::Granted;
        debug!("Audio focus request: {:?}", grant);
        grant
    }

    pub fn abandon_focus_if_held(&self) {
        let mut state = self.state.lock();
        if state.held {
            state.held = false;
            state.ducked = false;
            state.paused = false;
            self.platform.abandon_focus();
            debug!("Audio focus abandoned");
        }
    }

    /// Focus policy on state transitions of the active engine
    pub fn on_state_entered(&self, state: PlaybackState) -> FocusAction {
        if !self.automatic {
            return FocusAction::None;
        }

        match state {
            PlaybackState::Ready => match self.request_focus() {
                FocusGrant::Granted => FocusAction::None,
                FocusGrant::Denied => {
                    warn!("Audio focus denied, continuing {}", if self.always_pause_on_interruption { "paused" } else { "ducked" });
                    self.interrupt()
                }
            },
            PlaybackState::Idle | PlaybackState::Error => {
                self.abandon_focus_if_held();
                FocusAction::None
            }
            _ => FocusAction::None,
        }
    }

    /// Platform callback: focus was gained or lost
    pub fn on_focus_change(&self, change: FocusChange) -> FocusAction {
        info!("Audio focus change: {:?}", change);

        if !self.automatic {
            if change != FocusChange::Gain {
                self.hub.publish(PlayerEvent::FocusChanged {
                    lost_permanently: change == FocusChange::Loss,
                    paused: false,
                });
            }
            return FocusAction::None;
        }

        match change {
            FocusChange::Loss => {
                {
                    let mut state = self.state.lock();
                    state.ducked = false;
                    state.paused = false;
                }
                self.abandon_focus_if_held();
                self.hub.publish(PlayerEvent::FocusChanged {
                    lost_permanently: true,
                    paused: true,
                });
                FocusAction::Pause
            }
            FocusChange::LossTransient | FocusChange::LossTransientCanDuck => self.interrupt(),
            FocusChange::Gain => {
                let (unduck, resume) = {
                    let mut state = self.state.lock();
                    state.held = true;
                    let restored = (state.ducked, state.paused);
                    state.ducked = false;
                    state.paused = false;
                    restored
                };
                self.hub.publish(PlayerEvent::FocusChanged {
                    lost_permanently: false,
                    paused: false,
                });
                if unduck || resume {
                    FocusAction::Restore { unduck, resume }
                } else {
                    FocusAction::None
                }
            }
        }
    }

    fn interrupt(&self) -> FocusAction {
        let pause = self.always_pause_on_interruption;
        {
            let mut state = self.state.lock();
            if pause {
                state.paused = true;
            } else {
                state.ducked = true;
            }
        }
        self.hub.publish(PlayerEvent::FocusChanged {
            lost_permanently: false,
            paused: pause,
        });
        if pause {
            FocusAction::Pause
        } else {
            FocusAction::Duck
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPlatform {
        deny: AtomicBool,
        requests: AtomicUsize,
        abandons: AtomicUsize,
    }

    impl FocusPlatform for CountingPlatform {
        fn request_focus(&self) -> FocusGrant {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.deny.load(Ordering::SeqCst) {
                FocusGrant::Denied
            } else {
                FocusGrant::Granted
            }
        }

        fn abandon_focus(&self) {
            self.abandons.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn controller(automatic: bool, always_pause: bool) -> (FocusController, Arc<CountingPlatform>, EventHub) {
        let platform = Arc::new(CountingPlatform::default());
        let hub = EventHub::new();
        let focus = FocusController::new(platform.clone(), automatic, always_pause, hub.clone());
        (focus, platform, hub)
    }

    #[test]
    fn test_requests_on_ready_and_abandons_on_idle() {
        let (focus, platform, _hub) = controller(true, false);

        assert_eq!(focus.on_state_entered(PlaybackState::Ready), FocusAction::None);
        assert_eq!(focus.on_state_entered(PlaybackState::Ready), FocusAction::None);
        assert_eq!(platform.requests.load(Ordering::SeqCst), 1);
        assert!(focus.is_held());

        focus.on_state_entered(PlaybackState::Playing);
        focus.on_state_entered(PlaybackState::Idle);
        assert!(!focus.is_held());
        assert_eq!(platform.abandons.load(Ordering::SeqCst), 1);

        focus.on_state_entered(PlaybackState::Error);
        assert_eq!(platform.abandons.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_denied_focus_ducks_or_pauses() {
        let (focus, platform, hub) = controller(true, false);
        let events = hub.subscribe();
        platform.deny.store(true, Ordering::SeqCst);
        assert_eq!(focus.on_state_entered(PlaybackState::Ready), FocusAction::Duck);
        assert_eq!(
            events.drain(),
            vec![PlayerEvent::FocusChanged { lost_permanently: false, paused: false }]
        );

        let (focus, platform, _hub) = controller(true, true);
        platform.deny.store(true, Ordering::SeqCst);
        assert_eq!(focus.on_state_entered(PlaybackState::Ready), FocusAction::Pause);
    }

    #[test]
    fn test_transient_loss_and_regain() {
        let (focus, _platform, _hub) = controller(true, false);
        focus.request_focus();

        assert_eq!(focus.on_focus_change(FocusChange::LossTransientCanDuck), FocusAction::Duck);
        assert_eq!(
            focus.on_focus_change(FocusChange::Gain),
            FocusAction::Restore { unduck: true, resume: false }
        );

        let (focus, _platform, _hub) = controller(true, true);
        assert_eq!(focus.on_focus_change(FocusChange::LossTransient), FocusAction::Pause);
        assert_eq!(
            focus.on_focus_change(FocusChange::Gain),
            FocusAction::Restore { unduck: false, resume: true }
        );
        assert_eq!(focus.on_focus_change(FocusChange::Gain), FocusAction::None);
    }

    #[test]
    fn test_permanent_loss_pauses_and_abandons() {
        let (focus, platform, hub) = controller(true, false);
        let events = hub.subscribe();
        focus.request_focus();

        assert_eq!(focus.on_focus_change(FocusChange::Loss), FocusAction::Pause);
        assert!(!focus.is_held());
        assert_eq!(platform.abandons.load(Ordering::SeqCst), 1);
        assert_eq!(
            events.drain(),
            vec![PlayerEvent::FocusChanged { lost_permanently: true, paused: true }]
        );
    }

    #[test]
    fn test_manual_mode_only_relays() {
        let (focus, platform, hub) = controller(false, true);
        let events = hub.subscribe();

        assert_eq!(focus.on_state_entered(PlaybackState::Ready), FocusAction::None);
        assert_eq!(platform.requests.load(Ordering::SeqCst), 0);

        assert_eq!(focus.on_focus_change(FocusChange::LossTransient), FocusAction::None);
        assert_eq!(
            events.drain(),
            vec![PlayerEvent::FocusChanged { lost_permanently: false, paused: false }]
        );
    }
}

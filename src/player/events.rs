//! Event hub for trackdeck
//!
//! Producers (engine callbacks, focus signals, the crossfade controller)
//! publish [`PlayerEvent`]s; every subscriber owns an unbounded channel, so
//! publishing never blocks and each subscriber sees events in publish
//! order. Callback subscribers run on their own thread; a panic there is
//! caught and reported to the other subscribers as a
//! [`PlayerEvent::SubscriberFault`].

use crate::audio::{NativeDiscontinuityReason, NativePlayWhenReadyReason, NativeTransitionReason};
use crate::media::{MediaMetadata, MetadataEntry};
use crate::player::{EngineId, PlaybackState};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error};
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// Why the current item changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransitionReason {
    /// The previous item played to its end
    Auto,
    /// Explicit skip or jump to another item
    Seek,
    /// The queue was mutated under the current item
    QueueChanged,
    /// The same item started over
    Repeat,
}

impl From<NativeTransitionReason> for TransitionReason {
    fn from(reason: NativeTransitionReason) -> Self {
        match reason {
            NativeTransitionReason::Auto => TransitionReason::Auto,
            NativeTransitionReason::Seek => TransitionReason::Seek,
            NativeTransitionReason::PlaylistChanged => TransitionReason::QueueChanged,
            NativeTransitionReason::Repeat => TransitionReason::Repeat,
        }
    }
}

/// Why the playback position jumped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscontinuityReason {
    Seek,
    /// The renderer could not land exactly on the requested position
    SeekAdjustment,
    Remove,
    Skip,
    Internal,
}

impl From<NativeDiscontinuityReason> for DiscontinuityReason {
    fn from(reason: NativeDiscontinuityReason) -> Self {
        match reason {
            NativeDiscontinuityReason::Seek => DiscontinuityReason::Seek,
            NativeDiscontinuityReason::SeekAdjustment => DiscontinuityReason::SeekAdjustment,
            NativeDiscontinuityReason::Remove => DiscontinuityReason::Remove,
            NativeDiscontinuityReason::Skip => DiscontinuityReason::Skip,
            NativeDiscontinuityReason::AutoTransition | NativeDiscontinuityReason::Internal => {
                DiscontinuityReason::Internal
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlayWhenReadyReason {
    UserRequest,
    AudioFocusLoss,
    AudioBecomingNoisy,
    Remote,
    EndOfItem,
}

impl From<NativePlayWhenReadyReason> for PlayWhenReadyReason {
    fn from(reason: NativePlayWhenReadyReason) -> Self {
        match reason {
            NativePlayWhenReadyReason::UserRequest => PlayWhenReadyReason::UserRequest,
            NativePlayWhenReadyReason::AudioFocusLoss => PlayWhenReadyReason::AudioFocusLoss,
            NativePlayWhenReadyReason::AudioBecomingNoisy => PlayWhenReadyReason::AudioBecomingNoisy,
            NativePlayWhenReadyReason::Remote => PlayWhenReadyReason::Remote,
            NativePlayWhenReadyReason::EndOfMediaItem => PlayWhenReadyReason::EndOfItem,
        }
    }
}

/// Player events
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PlayerEvent {
    StateChanged {
        state: PlaybackState,
        previous: PlaybackState,
    },
    ItemTransitioned {
        old_index: Option<usize>,
        new_index: Option<usize>,
        reason: TransitionReason,
        /// Position in the old item, captured when the transition happened
        old_position: Duration,
    },
    PositionDiscontinuity {
        reason: DiscontinuityReason,
        old_position: Duration,
        new_position: Duration,
    },
    PlayWhenReadyChanged {
        play_when_ready: bool,
        reason: PlayWhenReadyReason,
    },
    TimedMetadata {
        entries: Vec<MetadataEntry>,
    },
    CommonMetadata {
        metadata: MediaMetadata,
    },
    PlaybackError {
        code: String,
        message: String,
    },
    FocusChanged {
        lost_permanently: bool,
        paused: bool,
    },
    VolumeFadeCompleted {
        tag: Option<String>,
    },
    /// Playback ran past the last item with repeat off
    QueueEnded {
        index: Option<usize>,
        position: Duration,
    },
    Progress {
        position: Duration,
        duration: Option<Duration>,
        buffered_position: Duration,
        index: Option<usize>,
    },
    EngineSwapped {
        active: EngineId,
    },
    SubscriberFault {
        subscriber: u64,
        message: String,
    },
    InvariantViolation {
        message: String,
    },
}

/// Discriminant of [`PlayerEvent`] used for filtered subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StateChanged,
    ItemTransitioned,
    PositionDiscontinuity,
    PlayWhenReadyChanged,
    TimedMetadata,
    CommonMetadata,
    PlaybackError,
    FocusChanged,
    VolumeFadeCompleted,
    QueueEnded,
    Progress,
    EngineSwapped,
    SubscriberFault,
    InvariantViolation,
}

impl PlayerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlayerEvent::StateChanged { .. } => EventKind::StateChanged,
            PlayerEvent::ItemTransitioned { .. } => EventKind::ItemTransitioned,
            PlayerEvent::PositionDiscontinuity { .. } => EventKind::PositionDiscontinuity,
            PlayerEvent::PlayWhenReadyChanged { .. } => EventKind::PlayWhenReadyChanged,
            PlayerEvent::TimedMetadata { .. } => EventKind::TimedMetadata,
            PlayerEvent::CommonMetadata { .. } => EventKind::CommonMetadata,
            PlayerEvent::PlaybackError { .. } => EventKind::PlaybackError,
            PlayerEvent::FocusChanged { .. } => EventKind::FocusChanged,
            PlayerEvent::VolumeFadeCompleted { .. } => EventKind::VolumeFadeCompleted,
            PlayerEvent::QueueEnded { .. } => EventKind::QueueEnded,
            PlayerEvent::Progress { .. } => EventKind::Progress,
            PlayerEvent::EngineSwapped { .. } => EventKind::EngineSwapped,
            PlayerEvent::SubscriberFault { .. } => EventKind::SubscriberFault,
            PlayerEvent::InvariantViolation { .. } => EventKind::InvariantViolation,
        }
    }
}

struct Slot {
    id: u64,
    kinds: Option<Vec<EventKind>>,
    tx: Sender<PlayerEvent>,
}

impl Slot {
    fn accepts(&self, kind: EventKind) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

#[derive(Default)]
struct HubInner {
    subscribers: RwLock<Vec<Slot>>,
    next_id: AtomicU64,
}

impl HubInner {
    fn publish_except(&self, skip: Option<u64>, event: PlayerEvent) {
        let kind = event.kind();
        let subscribers = self.subscribers.read();
        for slot in subscribers.iter() {
            if Some(slot.id) == skip || !slot.accepts(kind) {
                continue;
            }
            // A closed receiver is unregistered by its own drop
            let _ = slot.tx.send(event.clone());
        }
    }

    fn register(&self, kinds: Option<Vec<EventKind>>) -> (u64, Receiver<PlayerEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = unbounded();
        self.subscribers.write().push(Slot { id, kinds, tx });
        debug!("Event subscriber {} registered", id);
        (id, rx)
    }

    fn unregister(&self, id: u64) {
        self.subscribers.write().retain(|slot| slot.id != id);
        debug!("Event subscriber {} removed", id);
    }
}

/// Multi-subscriber broadcast of player events
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every registered subscriber; never blocks
    pub fn publish(&self, event: PlayerEvent) {
        self.inner.publish_except(None, event);
    }

    /// Subscribe to every event
    pub fn subscribe(&self) -> Subscription {
        let (id, rx) = self.inner.register(None);
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to the listed kinds only
    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        let (id, rx) = self.inner.register(Some(kinds.to_vec()));
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Run `callback` for every event on a dedicated thread
    pub fn subscribe_fn<F>(&self, callback: F) -> CallbackSubscription
    where
        F: Fn(&PlayerEvent) + Send + 'static,
    {
        let (id, rx) = self.inner.register(None);
        let hub = Arc::downgrade(&self.inner);
        let worker_hub = hub.clone();

        let worker = thread::Builder::new()
            .name(format!("trackdeck-events-{}", id))
            .spawn(move || {
                for event in rx.iter() {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                        let message = panic_message(panic.as_ref());
                        error!("Event subscriber {} panicked: {}", id, message);
                        if let Some(hub) = worker_hub.upgrade() {
                            hub.publish_except(Some(id), PlayerEvent::SubscriberFault { subscriber: id, message });
                        }
                    }
                }
            });

        if let Err(e) = &worker {
            error!("Failed to start event subscriber thread: {}", e);
            self.inner.unregister(id);
        }

        CallbackSubscription {
            id,
            hub,
            worker: worker.ok(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "subscriber panicked".to_string()
    }
}

/// Channel-backed subscription; unsubscribes when dropped
pub struct Subscription {
    id: u64,
    rx: Receiver<PlayerEvent>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn try_recv(&self) -> Option<PlayerEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PlayerEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Everything delivered so far
    pub fn drain(&self) -> Vec<PlayerEvent> {
        self.rx.try_iter().collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.id);
        }
    }
}

/// Callback subscription; unsubscribes when dropped
pub struct CallbackSubscription {
    id: u64,
    hub: Weak<HubInner>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CallbackSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unsubscribe and wait until already-delivered events are handled
    pub fn close(mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.id);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for CallbackSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.id);
        }
    }
}

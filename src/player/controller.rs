//! Crossfade controller for trackdeck
//!
//! This module owns the pair of render engines and the fade-and-swap
//! protocol that moves playback from the active engine to the standby one.
//! The active slot is an atomic selector shared with the engines, so any
//! reader sees either the pre-swap or the post-swap assignment.

use crate::audio::{FadeOutcome, FadeRequest};
use crate::media::Item;
use crate::player::engine::Roles;
use crate::player::{
    EngineId, EventHub, LoadStatus, PlaybackState, PlayerEvent, QueueManager, RenderEngine, Step, TransitionReason,
};
use crate::utils::error::{PlayerError, Result};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;

/// Where a crossfade should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossfadeTarget {
    Next,
    Previous,
    Index(usize),
}

/// How a crossfade request ended
#[derive(Debug)]
pub enum SwapOutcome {
    /// Roles were exchanged and `index` is now playing
    Swapped { from: EngineId, to: EngineId, index: usize },

    /// Nothing follows the current item with repeat off
    QueueEnded,

    /// The swap was abandoned; the active engine kept playing
    Aborted(PlayerError),

    /// Someone else took over the active engine's fade
    Interrupted,
}

impl SwapOutcome {
    pub fn is_swapped(&self) -> bool {
        matches!(self, SwapOutcome::Swapped { .. })
    }
}

/// Session-facing layer that follows the active engine
pub trait SessionSink: Send + Sync {
    /// Called with the new active engine's controls after every swap
    fn attach(&self, controls: TransportControls);
}

/// Transport surface of one engine, as handed to the session layer
#[derive(Debug, Clone)]
pub struct TransportControls {
    engine: RenderEngine,
}

impl TransportControls {
    pub(crate) fn new(engine: RenderEngine) -> Self {
        Self { engine }
    }

    pub fn engine_id(&self) -> EngineId {
        self.engine.id()
    }

    pub fn play(&self) {
        self.engine.play();
    }

    pub fn pause(&self) {
        self.engine.pause();
    }

    pub fn stop(&self) {
        self.engine.stop();
    }

    pub fn seek_to(&self, position: Duration) -> Result<()> {
        self.engine.seek_to(position)
    }

    pub fn state(&self) -> PlaybackState {
        self.engine.state()
    }

    pub fn position(&self) -> Duration {
        self.engine.position()
    }

    pub fn duration(&self) -> Option<Duration> {
        self.engine.duration()
    }

    pub fn current_item(&self) -> Option<Item> {
        self.engine.current_item()
    }
}

/// Timing of the two halves of a crossfade
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct CrossfadeOptions {
    pub duration: Duration,
    pub interval: Duration,
    /// Fade multiplier the incoming engine ramps up to
    pub target_volume: f32,
}

/// Clears the in-flight flag however the swap ends, including when the
/// crossfade future is dropped halfway
struct SwapGuard<'a> {
    roles: &'a Roles,
    _lock: tokio::sync::MutexGuard<'a, ()>,
}

impl Drop for SwapGuard<'_> {
    fn drop(&mut self) {
        self.roles.end_swap();
    }
}

/// Owner of the active/standby engine pair
pub struct CrossfadeController {
    engines: [RenderEngine; 2],
    roles: Arc<Roles>,
    swap_lock: tokio::sync::Mutex<()>,
    /// Queue index preloaded on the standby engine
    prepared: Mutex<Option<usize>>,
    queue: QueueManager,
    hub: EventHub,
    session: RwLock<Option<Arc<dyn SessionSink>>>,
    options: CrossfadeOptions,
}

impl CrossfadeController {
    pub(crate) fn new(
        engines: [RenderEngine; 2],
        roles: Arc<Roles>,
        queue: QueueManager,
        hub: EventHub,
        options: CrossfadeOptions,
    ) -> Self {
        Self {
            engines,
            roles,
            swap_lock: tokio::sync::Mutex::new(()),
            prepared: Mutex::new(None),
            queue,
            hub,
            session: RwLock::new(None),
            options,
        }
    }

    /// The audible engine
    pub fn active(&self) -> &RenderEngine {
        &self.engines[self.roles.active().0]
    }

    pub fn standby(&self) -> &RenderEngine {
        &self.engines[self.roles.active().0 ^ 1]
    }

    pub fn engine(&self, id: EngineId) -> Option<&RenderEngine> {
        self.engines.get(id.0)
    }

    pub fn is_swapping(&self) -> bool {
        self.roles.is_swapping()
    }

    /// The active engine, plus the standby while a swap is moving playback
    /// onto it
    pub(crate) fn audible(&self) -> impl Iterator<Item = &RenderEngine> + '_ {
        let swapping = self.is_swapping();
        std::iter::once(self.active()).chain(swapping.then(|| self.standby()))
    }

    /// Wait until no swap is in flight
    pub async fn settled(&self) {
        drop(self.swap_lock.lock().await);
    }

    /// Hand the session layer the active engine, now and after every swap
    pub fn attach_session(&self, session: Arc<dyn SessionSink>) {
        session.attach(TransportControls::new(self.active().clone()));
        *self.session.write() = Some(session);
    }

    fn begin_swap(&self) -> Result<SwapGuard<'_>> {
        let lock = self.swap_lock.try_lock().map_err(|_| PlayerError::SwapInProgress)?;
        if !self.roles.begin_swap() {
            return Err(PlayerError::SwapInProgress);
        }
        Ok(SwapGuard {
            roles: &self.roles,
            _lock: lock,
        })
    }

    /// Resolve a target to a queue index without moving the queue
    fn resolve(&self, target: CrossfadeTarget) -> Result<Option<(usize, Item)>> {
        let index = match target {
            CrossfadeTarget::Index(index) => index,
            CrossfadeTarget::Next | CrossfadeTarget::Previous => {
                let step = if target == CrossfadeTarget::Next {
                    self.queue.peek_next()
                } else {
                    self.queue.peek_previous()
                };
                match step {
                    Step::Empty => return Err(PlayerError::NoCurrentItem),
                    Step::QueueEnded => return Ok(None),
                    Step::To { to, .. } => to,
                    Step::Repeat(index) | Step::Clamped(index) => index,
                }
            }
        };
        let item = self.queue.get(index)?;
        Ok(Some((index, item)))
    }

    /// Preload `target` on the standby engine so a later crossfade to it
    /// starts without load latency
    ///
    /// Returns the prepared index, or `None` when the queue has nothing
    /// there.
    pub async fn prepare(&self, target: CrossfadeTarget) -> Result<Option<usize>> {
        let _guard = self.begin_swap()?;
        let Some((index, item)) = self.resolve(target)? else {
            return Ok(None);
        };

        let standby = self.standby();
        standby.set_fade_multiplier(0.0);
        match standby.load_entry(Some(index), item, TransitionReason::Seek, false) {
            LoadStatus::Loaded => {
                debug!("Prepared index {} on {}", index, standby.id());
                *self.prepared.lock() = Some(index);
                Ok(Some(index))
            }
            LoadStatus::Failed(err) => {
                self.discard_standby(standby);
                Err(err)
            }
        }
    }

    /// Forget a preloaded standby, e.g. after the queue changed under it
    pub(crate) fn discard_prepared(&self) {
        if self.prepared.lock().take().is_some() && !self.is_swapping() {
            self.discard_standby(self.standby());
        }
    }

    fn discard_standby(&self, standby: &RenderEngine) {
        standby.reset();
        standby.set_fade_multiplier(1.0);
    }

    /// Run the fade-and-swap protocol towards `target`
    ///
    /// Fails with [`PlayerError::SwapInProgress`] while another swap runs.
    /// Renderer failures do not fail the call: they abort the swap, leave
    /// the active engine audible, and are reported as
    /// [`SwapOutcome::Aborted`] plus a playback-error event.
    pub async fn crossfade(&self, target: CrossfadeTarget) -> Result<SwapOutcome> {
        let _guard = self.begin_swap()?;

        let Some((index, item)) = self.resolve(target)? else {
            let active = self.active();
            info!("Crossfade requested past the end of the queue");
            self.hub.publish(PlayerEvent::QueueEnded {
                index: active.current_index(),
                position: active.position(),
            });
            return Ok(SwapOutcome::QueueEnded);
        };

        let outgoing = self.active().clone();
        let incoming = self.standby().clone();
        let old_index = outgoing.current_index();
        let old_position = outgoing.position();
        let locator = item.locator().to_string();
        info!(
            "Crossfading {} -> {} to index {} over {:?}",
            outgoing.id(),
            incoming.id(),
            index,
            self.options.duration
        );

        // The incoming engine starts silent, at the user's volume
        incoming.set_volume(outgoing.volume());
        incoming.set_ducked(outgoing.is_ducked());
        incoming.set_fade_multiplier(0.0);

        let prepared = self.prepared.lock().take();
        let reuse = prepared == Some(index)
            && incoming.current_index() == Some(index)
            && incoming.state() != PlaybackState::Error;
        if reuse {
            debug!("Reusing prepared index {} on {}", index, incoming.id());
            incoming.play();
        } else if let LoadStatus::Failed(err) = incoming.load_entry(Some(index), item, TransitionReason::Seek, true) {
            warn!("Crossfade aborted, standby failed to load: {}", err);
            self.discard_standby(&incoming);
            return Ok(SwapOutcome::Aborted(err));
        }

        if let Some(err) = self.standby_failure(&incoming, &locator) {
            self.discard_standby(&incoming);
            return Ok(SwapOutcome::Aborted(err));
        }

        let fade_out = outgoing.fade_volume(FadeRequest::new(0.0, self.options.duration, self.options.interval))?;
        if fade_out.finished().await == FadeOutcome::Cancelled {
            warn!("Crossfade interrupted while fading out {}", outgoing.id());
            self.discard_standby(&incoming);
            return Ok(SwapOutcome::Interrupted);
        }

        if let Some(err) = self.standby_failure(&incoming, &locator) {
            outgoing.set_fade_multiplier(1.0);
            self.discard_standby(&incoming);
            return Ok(SwapOutcome::Aborted(err));
        }

        // Volume and focus changes made during the fade-out carry over
        incoming.set_volume(outgoing.volume());
        incoming.set_ducked(outgoing.is_ducked());
        let to = self.roles.swap();
        outgoing.pause();
        if let Err(e) = self.queue.jump_to(index) {
            warn!("Queue changed during crossfade: {}", e);
        }
        incoming.announce_state();
        self.hub.publish(PlayerEvent::ItemTransitioned {
            old_index,
            new_index: Some(index),
            reason: if old_index == Some(index) {
                TransitionReason::Repeat
            } else {
                TransitionReason::Seek
            },
            old_position,
        });
        self.hub.publish(PlayerEvent::EngineSwapped { active: to });
        if let Some(session) = self.session.read().clone() {
            session.attach(TransportControls::new(incoming.clone()));
        }

        let fade_in = incoming.fade_volume(FadeRequest::new(
            self.options.target_volume,
            self.options.duration,
            self.options.interval,
        ))?;
        if fade_in.finished().await == FadeOutcome::Cancelled {
            debug!("Fade-in of {} superseded", incoming.id());
        }

        self.discard_standby(&outgoing);

        if incoming.current_item().is_none()
            || matches!(incoming.state(), PlaybackState::Idle | PlaybackState::Stopped)
        {
            let message = format!(
                "{} is active after a swap but reports {} with item {:?}",
                incoming.id(),
                incoming.state(),
                incoming.current_index()
            );
            error!("{}", message);
            self.hub.publish(PlayerEvent::InvariantViolation {
                message: message.clone(),
            });
            for engine in &self.engines {
                engine.reset();
                engine.set_fade_multiplier(1.0);
            }
            return Ok(SwapOutcome::Aborted(PlayerError::Internal(message)));
        }

        info!("Swap complete, {} is active", to);
        Ok(SwapOutcome::Swapped {
            from: outgoing.id(),
            to,
            index,
        })
    }

    fn standby_failure(&self, standby: &RenderEngine, locator: &str) -> Option<PlayerError> {
        if standby.state() != PlaybackState::Error {
            return None;
        }
        let reason = standby
            .playback_error()
            .map_or_else(|| "renderer error".to_string(), |e| e.to_string());
        warn!("Crossfade aborted, standby failed: {}", reason);
        Some(PlayerError::source_unavailable(locator, reason))
    }

    /// Release both engines
    pub fn release(&self) {
        *self.prepared.lock() = None;
        for engine in &self.engines {
            engine.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        FocusController, GrantAllFocus, RendererFactory, RendererOptions, SimulatedBackend, VolumeMix,
    };
    use crate::media::DefaultResolver;
    use crate::player::engine::EngineContext;
    use crate::player::{RepeatMode, Subscription};
    use crate::utils::config::BufferBounds;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Rig {
        controller: CrossfadeController,
        backend: SimulatedBackend,
        queue: QueueManager,
        events: Subscription,
    }

    fn rig(names: &[&str]) -> Rig {
        let hub = EventHub::new();
        let events = hub.subscribe();
        let roles = Arc::new(Roles::new());
        let queue = QueueManager::new();
        let backend = SimulatedBackend::new();
        let context = EngineContext {
            hub: hub.clone(),
            roles: roles.clone(),
            focus: Arc::new(FocusController::new(Arc::new(GrantAllFocus), true, false, hub.clone())),
            queue: queue.clone(),
            resolver: Arc::new(DefaultResolver::new()),
            volume: VolumeMix::default(),
        };
        let options = RendererOptions {
            buffer: BufferBounds::default(),
            skip_silence: false,
            cache_size_bytes: 0,
        };
        let engines = [
            RenderEngine::new(EngineId(0), backend.create(&options), context.clone()),
            RenderEngine::new(EngineId(1), backend.create(&options), context),
        ];
        let controller = CrossfadeController::new(
            engines,
            roles,
            queue.clone(),
            hub,
            CrossfadeOptions {
                duration: Duration::from_millis(500),
                interval: Duration::from_millis(20),
                target_volume: 1.0,
            },
        );

        queue
            .add(
                names
                    .iter()
                    .map(|name| Item::builder(format!("https://example.com/{}.mp3", name)).build().unwrap())
                    .collect(),
                None,
            )
            .unwrap();
        if let Ok(item) = queue.get(0) {
            controller.active().load_entry(Some(0), item, TransitionReason::Seek, true);
        }
        events.drain();

        Rig {
            controller,
            backend,
            queue,
            events,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_crossfade_next_swaps_roles() {
        let rig = rig(&["a", "b", "c"]);
        let outcome = rig.controller.crossfade(CrossfadeTarget::Next).await.unwrap();

        assert!(matches!(
            outcome,
            SwapOutcome::Swapped { from: EngineId(0), to: EngineId(1), index: 1 }
        ));
        let active = rig.controller.active();
        assert_eq!(active.id(), EngineId(1));
        assert_eq!(active.effective_volume(), 1.0);
        assert_eq!(active.state(), PlaybackState::Playing);
        assert_eq!(rig.queue.current_index(), Some(1));

        let old = rig.controller.standby();
        assert!(matches!(old.state(), PlaybackState::Idle | PlaybackState::Stopped));
        assert!(old.current_item().is_none());
        assert_eq!(old.fade_multiplier(), 1.0);
        assert!(!rig.controller.is_swapping());

        let events = rig.events.drain();
        assert!(events.contains(&PlayerEvent::EngineSwapped { active: EngineId(1) }));
        assert!(events.iter().any(|event| matches!(
            event,
            PlayerEvent::ItemTransitioned { old_index: Some(0), new_index: Some(1), .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_crossfade_is_rejected() {
        let rig = rig(&["a", "b", "c"]);
        let (first, second) = tokio::join!(
            rig.controller.crossfade(CrossfadeTarget::Next),
            rig.controller.crossfade(CrossfadeTarget::Next)
        );

        assert!(first.unwrap().is_swapped());
        assert!(matches!(second, Err(PlayerError::SwapInProgress)));
        assert_eq!(rig.queue.current_index(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_keeps_active_audible() {
        let rig = rig(&["a", "b"]);
        rig.backend.mark_unplayable("https://example.com/b.mp3");

        let outcome = rig.controller.crossfade(CrossfadeTarget::Next).await.unwrap();
        assert!(matches!(outcome, SwapOutcome::Aborted(PlayerError::SourceUnavailable { .. })));

        let active = rig.controller.active();
        assert_eq!(active.id(), EngineId(0));
        assert_eq!(active.effective_volume(), 1.0);
        assert_eq!(active.state(), PlaybackState::Playing);
        assert_eq!(rig.queue.current_index(), Some(0));
        assert!(rig
            .events
            .drain()
            .iter()
            .any(|event| matches!(event, PlayerEvent::PlaybackError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_standby_error_during_fade_aborts() {
        let rig = rig(&["a", "b"]);
        let standby = rig.backend.control(1).unwrap();

        let (outcome, _) = tokio::join!(rig.controller.crossfade(CrossfadeTarget::Next), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            standby.fail("ERROR_CODE_DECODING_FAILED", "corrupt");
        });

        assert!(matches!(outcome.unwrap(), SwapOutcome::Aborted(_)));
        let active = rig.controller.active();
        assert_eq!(active.id(), EngineId(0));
        assert_eq!(active.fade_multiplier(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crossfade_past_end() {
        let rig = rig(&["a"]);
        let outcome = rig.controller.crossfade(CrossfadeTarget::Next).await.unwrap();
        assert!(matches!(outcome, SwapOutcome::QueueEnded));
        assert!(rig
            .events
            .drain()
            .iter()
            .any(|event| matches!(event, PlayerEvent::QueueEnded { index: Some(0), .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_crossfade_wraps_with_repeat_queue() {
        let rig = rig(&["a", "b"]);
        rig.queue.jump_to(1).unwrap();
        rig.queue.set_repeat_mode(RepeatMode::Queue);
        let outcome = rig.controller.crossfade(CrossfadeTarget::Next).await.unwrap();
        assert!(matches!(outcome, SwapOutcome::Swapped { index: 0, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prepared_standby_is_reused() {
        let rig = rig(&["a", "b"]);
        assert_eq!(rig.controller.prepare(CrossfadeTarget::Next).await.unwrap(), Some(1));
        let standby = rig.backend.control(1).unwrap();
        assert!(!standby.is_playing());

        let outcome = rig.controller.crossfade(CrossfadeTarget::Next).await.unwrap();
        assert!(outcome.is_swapped());
        assert_eq!(standby.opened().len(), 1);
        assert!(standby.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_follows_active_engine() {
        #[derive(Default)]
        struct Recorder(AtomicUsize, Mutex<Vec<EngineId>>);

        impl SessionSink for Recorder {
            fn attach(&self, controls: TransportControls) {
                self.0.fetch_add(1, Ordering::SeqCst);
                self.1.lock().push(controls.engine_id());
            }
        }

        let rig = rig(&["a", "b"]);
        let session = Arc::new(Recorder::default());
        rig.controller.attach_session(session.clone());
        rig.controller.crossfade(CrossfadeTarget::Index(1)).await.unwrap();

        assert_eq!(session.0.load(Ordering::SeqCst), 2);
        assert_eq!(*session.1.lock(), vec![EngineId(0), EngineId(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_target() {
        let rig = rig(&["a"]);
        assert!(matches!(
            rig.controller.crossfade(CrossfadeTarget::Index(5)).await,
            Err(PlayerError::IndexOutOfRange { index: 5, len: 1 })
        ));
        assert!(!rig.controller.is_swapping());
    }
}

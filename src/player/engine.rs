//! Render engine for trackdeck
//!
//! A [`RenderEngine`] owns one native renderer and translates its callbacks
//! into player events. Native callbacks never run engine logic directly:
//! they land in an inbox that is drained once the renderer call that
//! produced them has returned, so a callback may trigger further commands
//! (a focus pause, an auto-advance) without re-entering the renderer.
//!
//! Lock order is core before renderer. Code holding the renderer lock must
//! never take the core lock.

use crate::audio::{
    FadeHandle, FadePlan, FadeRequest, FadeSink, FocusAction, FocusController, NativeDiscontinuityReason, NativeMetadata,
    NativePlayWhenReadyReason, NativeState, NativeTransitionReason, Renderer, RendererError, RendererListener, VolumeMix,
};
use crate::media::{Item, MediaMetadata, SourceResolver};
use crate::player::{
    EngineId, EventHub, PlaybackState, PlayerEvent, QueueManager, StateMachine, StateTransition, Step, TransitionReason,
};
use crate::utils::error::{PlayerError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Which engine of the pair is audible, shared by both engines
///
/// Also holds the last state published to subscribers, so the event
/// stream stays de-duplicated across a swap.
#[derive(Debug)]
pub(crate) struct Roles {
    active: AtomicUsize,
    swapping: AtomicBool,
    published: Mutex<PlaybackState>,
}

impl Roles {
    pub(crate) fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            swapping: AtomicBool::new(false),
            published: Mutex::new(PlaybackState::Idle),
        }
    }

    pub(crate) fn active(&self) -> EngineId {
        EngineId(self.active.load(Ordering::SeqCst))
    }

    pub(crate) fn is_active(&self, id: EngineId) -> bool {
        self.active.load(Ordering::SeqCst) == id.0
    }

    /// Exchange the roles, returning the new active engine
    pub(crate) fn swap(&self) -> EngineId {
        EngineId(self.active.fetch_xor(1, Ordering::SeqCst) ^ 1)
    }

    pub(crate) fn is_swapping(&self) -> bool {
        self.swapping.load(Ordering::SeqCst)
    }

    /// Mark a swap as started; false when one is already running
    pub(crate) fn begin_swap(&self) -> bool {
        self.swapping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_swap(&self) {
        self.swapping.store(false, Ordering::SeqCst);
    }
}

/// Collaborators shared by the engines of one player
#[derive(Clone)]
pub(crate) struct EngineContext {
    pub hub: EventHub,
    pub roles: Arc<Roles>,
    pub focus: Arc<FocusController>,
    pub queue: QueueManager,
    pub resolver: Arc<dyn SourceResolver>,
    pub volume: VolumeMix,
}

/// Result of handing an item to the renderer
///
/// Renderer failures are absorbed into the Error state and a
/// playback-error event; the status only tells the caller whether to go on.
#[derive(Debug)]
pub enum LoadStatus {
    Loaded,
    Failed(PlayerError),
}

impl LoadStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadStatus::Loaded)
    }
}

enum NativeEvent {
    State(NativeState),
    Transition(NativeTransitionReason),
    Discontinuity {
        old_ms: u64,
        new_ms: u64,
        reason: NativeDiscontinuityReason,
    },
    PlayWhenReady(bool, NativePlayWhenReadyReason),
    Playing(bool),
    Metadata(NativeMetadata),
    Error(RendererError),
}

enum Effect {
    Publish(PlayerEvent),
    Entered(StateTransition),
    EndOfMedia,
}

struct PendingTransition {
    old_index: Option<usize>,
    new_index: Option<usize>,
    reason: TransitionReason,
    old_position: Duration,
}

#[derive(Default)]
struct FadeSlot {
    generation: u64,
    abort: Option<AbortHandle>,
}

impl FadeSlot {
    /// Retire the running fade, if any, and return the next generation
    fn supersede(&mut self) -> u64 {
        self.generation += 1;
        if let Some(abort) = self.abort.take() {
            abort.abort();
        }
        self.generation
    }
}

struct EngineCore {
    machine: StateMachine,
    item: Option<Item>,
    index: Option<usize>,
    play_when_ready: bool,
    native_playing: bool,
    pending: Option<PendingTransition>,
    last_position: Duration,
    volume: VolumeMix,
    speed: f32,
    fade: FadeSlot,
    error: Option<RendererError>,
}

impl EngineCore {
    fn enter(&mut self, state: PlaybackState, effects: &mut Vec<Effect>) {
        if let Some(transition) = self.machine.apply(state) {
            effects.push(Effect::Entered(transition));
        }
    }

    fn force(&mut self, state: PlaybackState, effects: &mut Vec<Effect>) {
        if let Some(transition) = self.machine.force(state) {
            effects.push(Effect::Entered(transition));
        }
    }
}

struct EngineInner {
    id: EngineId,
    renderer: Mutex<Box<dyn Renderer>>,
    core: Mutex<EngineCore>,
    inbox: Receiver<NativeEvent>,
    in_renderer_call: AtomicBool,
    draining: AtomicBool,
    hub: EventHub,
    roles: Arc<Roles>,
    focus: Arc<FocusController>,
    queue: QueueManager,
    resolver: Arc<dyn SourceResolver>,
}

impl EngineInner {
    fn is_active(&self) -> bool {
        self.roles.is_active(self.id)
    }

    /// Publish through the gate: a standby engine only reports errors, and
    /// state changes are de-duplicated against what subscribers last saw
    fn publish(&self, event: PlayerEvent) {
        match event {
            PlayerEvent::PlaybackError { .. } => self.hub.publish(event),
            _ if !self.is_active() => trace!("{}: standby event suppressed: {:?}", self.id, event.kind()),
            PlayerEvent::StateChanged { state, .. } => {
                let mut published = self.roles.published.lock();
                if *published == state {
                    return;
                }
                let previous = std::mem::replace(&mut *published, state);
                self.hub.publish(PlayerEvent::StateChanged { state, previous });
            }
            other => self.hub.publish(other),
        }
    }

    /// Push the effective volume to the renderer with the core lock held
    fn write_volume(&self, core: &EngineCore) {
        let effective = core.volume.effective();
        self.renderer.lock().set_volume(effective);
    }
}

impl FadeSink for EngineInner {
    fn write_fade_level(&self, generation: u64, level: f32) -> bool {
        let mut core = self.core.lock();
        if core.fade.generation != generation {
            return false;
        }
        core.volume.fade = level;
        self.write_volume(&core);
        true
    }

    fn finish_fade(&self, generation: u64, target: f32, tag: Option<String>) -> bool {
        {
            let mut core = self.core.lock();
            if core.fade.generation != generation {
                return false;
            }
            core.volume.fade = target;
            core.fade.abort = None;
            self.write_volume(&core);
        }
        if tag.is_some() {
            self.publish(PlayerEvent::VolumeFadeCompleted { tag });
        }
        true
    }

    fn cancel_fade(&self, generation: u64) {
        let mut core = self.core.lock();
        if core.fade.generation == generation {
            core.fade.generation += 1;
            core.fade.abort = None;
        }
    }
}

/// Listener installed on the renderer; only queues and wakes the engine
struct NativeBridge {
    engine: Weak<EngineInner>,
    tx: Sender<NativeEvent>,
}

impl NativeBridge {
    fn push(&self, event: NativeEvent) {
        if self.tx.send(event).is_err() {
            return;
        }
        if let Some(inner) = self.engine.upgrade() {
            RenderEngine { inner }.pump();
        }
    }
}

impl RendererListener for NativeBridge {
    fn on_state_changed(&self, state: NativeState) {
        self.push(NativeEvent::State(state));
    }

    fn on_item_transition(&self, reason: NativeTransitionReason) {
        self.push(NativeEvent::Transition(reason));
    }

    fn on_position_discontinuity(&self, old_position_ms: u64, new_position_ms: u64, reason: NativeDiscontinuityReason) {
        self.push(NativeEvent::Discontinuity {
            old_ms: old_position_ms,
            new_ms: new_position_ms,
            reason,
        });
    }

    fn on_play_when_ready_changed(&self, play_when_ready: bool, reason: NativePlayWhenReadyReason) {
        self.push(NativeEvent::PlayWhenReady(play_when_ready, reason));
    }

    fn on_is_playing_changed(&self, is_playing: bool) {
        self.push(NativeEvent::Playing(is_playing));
    }

    fn on_metadata(&self, metadata: NativeMetadata) {
        self.push(NativeEvent::Metadata(metadata));
    }

    fn on_error(&self, error: RendererError) {
        self.push(NativeEvent::Error(error));
    }
}

/// One native renderer plus its state machine and volume mix
///
/// Cheap to clone; clones drive the same renderer.
#[derive(Clone)]
pub struct RenderEngine {
    inner: Arc<EngineInner>,
}

impl RenderEngine {
    pub(crate) fn new(id: EngineId, renderer: Box<dyn Renderer>, context: EngineContext) -> Self {
        let (tx, inbox) = unbounded();
        let inner = Arc::new_cyclic(|engine: &Weak<EngineInner>| {
            let mut renderer = renderer;
            renderer.set_listener(Arc::new(NativeBridge {
                engine: engine.clone(),
                tx,
            }));
            renderer.set_volume(context.volume.effective());

            EngineInner {
                id,
                renderer: Mutex::new(renderer),
                core: Mutex::new(EngineCore {
                    machine: StateMachine::new(id.to_string()),
                    item: None,
                    index: None,
                    play_when_ready: false,
                    native_playing: false,
                    pending: None,
                    last_position: Duration::ZERO,
                    volume: context.volume,
                    speed: 1.0,
                    fade: FadeSlot::default(),
                    error: None,
                }),
                inbox,
                in_renderer_call: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                hub: context.hub,
                roles: context.roles,
                focus: context.focus,
                queue: context.queue,
                resolver: context.resolver,
            }
        });
        debug!("{} created", id);
        Self { inner }
    }

    pub fn id(&self) -> EngineId {
        self.inner.id
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    fn with_renderer<R>(&self, f: impl FnOnce(&mut dyn Renderer) -> R) -> R {
        let result = {
            let mut renderer = self.inner.renderer.lock();
            self.inner.in_renderer_call.store(true, Ordering::SeqCst);
            let result = f(&mut **renderer);
            self.inner.in_renderer_call.store(false, Ordering::SeqCst);
            result
        };
        self.pump();
        result
    }

    /// Drain queued native events unless a renderer call or another drain
    /// is in progress; whoever holds that will drain afterwards
    fn pump(&self) {
        loop {
            if self.inner.in_renderer_call.load(Ordering::SeqCst) {
                return;
            }
            if self
                .inner
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }

            while let Ok(event) = self.inner.inbox.try_recv() {
                let effects = self.translate(event);
                self.run(effects);
            }

            self.inner.draining.store(false, Ordering::SeqCst);
            if self.inner.inbox.is_empty() {
                return;
            }
        }
    }

    fn translate(&self, event: NativeEvent) -> Vec<Effect> {
        let mut core = self.inner.core.lock();
        let mut effects = Vec::new();

        match event {
            NativeEvent::State(NativeState::Buffering) => core.enter(PlaybackState::Buffering, &mut effects),
            NativeEvent::State(NativeState::Ready) => {
                if core.play_when_ready || core.machine.current() != PlaybackState::Paused {
                    core.enter(PlaybackState::Ready, &mut effects);
                }
            }
            NativeEvent::State(NativeState::Idle) => core.enter(PlaybackState::Idle, &mut effects),
            NativeEvent::State(NativeState::Ended) => {
                if self.is_active() && !self.inner.roles.is_swapping() && core.item.is_some() {
                    effects.push(Effect::EndOfMedia);
                } else if core.item.is_some() {
                    core.enter(PlaybackState::Ended, &mut effects);
                } else {
                    core.enter(PlaybackState::Idle, &mut effects);
                }
            }
            NativeEvent::Transition(reason) => {
                let event = match core.pending.take() {
                    Some(pending) => PlayerEvent::ItemTransitioned {
                        old_index: pending.old_index,
                        new_index: pending.new_index,
                        reason: pending.reason,
                        old_position: pending.old_position,
                    },
                    None => PlayerEvent::ItemTransitioned {
                        old_index: core.index,
                        new_index: core.index,
                        reason: reason.into(),
                        old_position: core.last_position,
                    },
                };
                effects.push(Effect::Publish(event));
            }
            NativeEvent::Discontinuity { old_ms, new_ms, reason } => {
                core.last_position = Duration::from_millis(old_ms);
                effects.push(Effect::Publish(PlayerEvent::PositionDiscontinuity {
                    reason: reason.into(),
                    old_position: Duration::from_millis(old_ms),
                    new_position: Duration::from_millis(new_ms),
                }));
            }
            NativeEvent::PlayWhenReady(value, reason) => {
                core.play_when_ready = value;
                effects.push(Effect::Publish(PlayerEvent::PlayWhenReadyChanged {
                    play_when_ready: value,
                    reason: reason.into(),
                }));
                // Error only clears through retry or reload
                let pausable = !matches!(core.machine.current(), PlaybackState::Stopped | PlaybackState::Error);
                if !value && core.item.is_some() && pausable {
                    core.enter(PlaybackState::Paused, &mut effects);
                }
            }
            NativeEvent::Playing(playing) => {
                core.native_playing = playing;
                if playing {
                    core.enter(PlaybackState::Playing, &mut effects);
                }
            }
            NativeEvent::Metadata(NativeMetadata::Timed(entries)) => {
                effects.push(Effect::Publish(PlayerEvent::TimedMetadata { entries }));
            }
            NativeEvent::Metadata(NativeMetadata::Common(metadata)) => {
                effects.push(Effect::Publish(PlayerEvent::CommonMetadata { metadata }));
            }
            NativeEvent::Error(error) => {
                warn!("{}: renderer error {}", self.inner.id, error);
                core.native_playing = false;
                effects.push(Effect::Publish(PlayerEvent::PlaybackError {
                    code: error.normalized_code(),
                    message: error.message.clone(),
                }));
                core.error = Some(error);
                core.enter(PlaybackState::Error, &mut effects);
            }
        }

        effects
    }

    fn run(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Publish(event) => self.inner.publish(event),
                Effect::Entered(transition) => {
                    self.inner.publish(PlayerEvent::StateChanged {
                        state: transition.state,
                        previous: transition.previous,
                    });
                    if self.is_active() {
                        let action = self.inner.focus.on_state_entered(transition.state);
                        self.apply_focus(action);
                    }
                }
                Effect::EndOfMedia => self.end_of_media(),
            }
        }
    }

    /// Carry out a focus decision on this engine
    pub fn apply_focus(&self, action: FocusAction) {
        match action {
            FocusAction::None => {}
            FocusAction::Duck => self.set_ducked(true),
            FocusAction::Pause => self.pause(),
            FocusAction::Restore { unduck, resume } => {
                if unduck {
                    self.set_ducked(false);
                }
                if resume {
                    self.play();
                }
            }
        }
    }

    /// Auto-advance through the queue once the current item has ended
    fn end_of_media(&self) {
        let position = self.position();
        let reload = match self.inner.queue.next() {
            Step::To { to, .. } => Some((to, TransitionReason::Auto)),
            Step::Repeat(index) => Some((index, TransitionReason::Repeat)),
            Step::Clamped(_) | Step::QueueEnded | Step::Empty => None,
        };

        if let Some((index, reason)) = reload {
            match self.inner.queue.get(index) {
                Ok(item) => {
                    debug!("{}: advancing to {} ({:?})", self.inner.id, index, reason);
                    self.load_entry(Some(index), item, reason, true);
                    return;
                }
                Err(e) => warn!("{}: cannot advance to {}: {}", self.inner.id, index, e),
            }
        }

        let (effects, index) = {
            let mut core = self.inner.core.lock();
            let mut effects = Vec::new();
            core.enter(PlaybackState::Ended, &mut effects);
            (effects, core.index)
        };
        self.run(effects);
        info!("{}: queue ended", self.inner.id);
        self.inner.publish(PlayerEvent::QueueEnded { index, position });
    }

    fn fail(&self, error: RendererError) {
        warn!("{}: {}", self.inner.id, error);
        let effects = {
            let mut core = self.inner.core.lock();
            core.native_playing = false;
            let mut effects = vec![Effect::Publish(PlayerEvent::PlaybackError {
                code: error.normalized_code(),
                message: error.message.clone(),
            })];
            core.error = Some(error);
            core.enter(PlaybackState::Error, &mut effects);
            effects
        };
        self.run(effects);
    }

    /// Replace the renderer's source with `item`
    ///
    /// # Arguments
    ///
    /// * `index` - Queue index the item came from, if any
    /// * `item` - Item to open
    /// * `reason` - Reported with the item-transitioned event
    /// * `play_when_ready` - Start playing once buffered
    pub fn load_entry(
        &self,
        index: Option<usize>,
        item: Item,
        reason: TransitionReason,
        play_when_ready: bool,
    ) -> LoadStatus {
        let old_position = self.position();

        let source = match self.inner.resolver.resolve(&item) {
            Ok(source) => source,
            Err(err) => {
                self.fail(RendererError::new(err.code(), err.to_string()));
                return LoadStatus::Failed(err);
            }
        };

        let effects = {
            let mut core = self.inner.core.lock();
            core.pending = Some(PendingTransition {
                old_index: core.index,
                new_index: index,
                reason,
                old_position,
            });
            core.item = Some(item);
            core.index = index;
            core.play_when_ready = play_when_ready;
            core.native_playing = false;
            core.error = None;
            core.last_position = Duration::ZERO;

            let mut effects = Vec::new();
            core.force(PlaybackState::Loading, &mut effects);
            effects
        };
        self.run(effects);

        match self.with_renderer(|renderer| renderer.open(&source, play_when_ready)) {
            Ok(()) => LoadStatus::Loaded,
            Err(error) => {
                let locator = source.uri.clone();
                let reason = error.to_string();
                self.inner.core.lock().pending = None;
                self.fail(error);
                LoadStatus::Failed(PlayerError::source_unavailable(locator, reason))
            }
        }
    }

    /// Load an item that is not tied to a queue index
    pub fn load(&self, item: Item, play_when_ready: bool) -> LoadStatus {
        self.load_entry(None, item, TransitionReason::QueueChanged, play_when_ready)
    }

    pub fn play(&self) {
        {
            let mut core = self.inner.core.lock();
            core.play_when_ready = true;
            if core.machine.current() == PlaybackState::Error {
                debug!("{}: play deferred until retry", self.inner.id);
                return;
            }
        }
        self.with_renderer(|renderer| renderer.play());
    }

    pub fn pause(&self) {
        self.inner.core.lock().play_when_ready = false;
        self.with_renderer(|renderer| renderer.pause());
    }

    pub fn toggle_play(&self) {
        if self.play_when_ready() {
            self.pause();
        } else {
            self.play();
        }
    }

    pub fn set_play_when_ready(&self, play_when_ready: bool) {
        if play_when_ready {
            self.play();
        } else {
            self.pause();
        }
    }

    /// Stop playback and release decoding resources, keeping the item
    pub fn stop(&self) {
        let effects = {
            let mut core = self.inner.core.lock();
            core.play_when_ready = false;
            let mut effects = Vec::new();
            core.force(PlaybackState::Stopped, &mut effects);
            effects
        };
        self.run(effects);
        self.with_renderer(|renderer| {
            renderer.pause();
            renderer.stop();
        });
    }

    /// Drop the source and the logical item
    pub fn clear(&self) {
        let old_position = self.position();
        {
            let mut core = self.inner.core.lock();
            if core.item.is_some() {
                core.pending = Some(PendingTransition {
                    old_index: core.index,
                    new_index: None,
                    reason: TransitionReason::QueueChanged,
                    old_position,
                });
            }
        }
        self.with_renderer(|renderer| renderer.clear());

        let effects = {
            let mut core = self.inner.core.lock();
            core.item = None;
            core.index = None;
            core.pending = None;
            core.error = None;
            core.native_playing = false;
            let mut effects = Vec::new();
            core.force(PlaybackState::Idle, &mut effects);
            effects
        };
        self.run(effects);
    }

    pub fn reset(&self) {
        self.stop();
        self.clear();
    }

    /// Leave the Error state and prepare the current source again
    pub fn retry(&self) -> Result<()> {
        let (effects, play_when_ready) = {
            let mut core = self.inner.core.lock();
            if core.item.is_none() {
                return Err(PlayerError::NoCurrentItem);
            }
            core.error = None;
            let mut effects = Vec::new();
            if core.machine.current() == PlaybackState::Error {
                core.force(PlaybackState::Idle, &mut effects);
            }
            (effects, core.play_when_ready)
        };
        self.run(effects);

        info!("{}: retrying", self.inner.id);
        let prepared = self.with_renderer(|renderer| {
            renderer.prepare()?;
            if play_when_ready {
                renderer.play();
            }
            Ok::<(), RendererError>(())
        });
        if let Err(error) = prepared {
            self.fail(error);
        }
        Ok(())
    }

    /// Seek within the current item, clamped to `[0, duration]`
    pub fn seek_to(&self, position: Duration) -> Result<()> {
        if self.inner.core.lock().item.is_none() {
            return Err(PlayerError::NoCurrentItem);
        }
        let requested = position.as_millis().min(u64::MAX as u128) as u64;
        self.with_renderer(|renderer| {
            let target = renderer.duration_ms().map_or(requested, |duration| requested.min(duration));
            renderer.seek_to(target);
        });
        Ok(())
    }

    /// Seek relative to the current position
    pub fn seek_by(&self, offset_ms: i64) -> Result<()> {
        let current = self.position().as_millis() as i64;
        let target = current.saturating_add(offset_ms).max(0) as u64;
        self.seek_to(Duration::from_millis(target))
    }

    /// Set the caller-owned base volume; the fade multiplier is untouched
    pub fn set_volume(&self, volume: f32) {
        let mut core = self.inner.core.lock();
        core.volume.base = volume.clamp(0.0, 1.0);
        self.inner.write_volume(&core);
    }

    /// Set the fade multiplier directly, superseding any running fade
    pub fn set_fade_multiplier(&self, level: f32) {
        let mut core = self.inner.core.lock();
        core.fade.supersede();
        core.volume.fade = level.clamp(0.0, 1.0);
        self.inner.write_volume(&core);
    }

    pub fn set_ducked(&self, ducked: bool) {
        let mut core = self.inner.core.lock();
        if core.volume.ducked != ducked {
            debug!("{}: ducked {}", self.inner.id, ducked);
            core.volume.ducked = ducked;
            self.inner.write_volume(&core);
        }
    }

    pub fn set_playback_speed(&self, speed: f32) -> Result<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(PlayerError::InvalidInput(format!("playback speed must be positive, got {}", speed)));
        }
        self.inner.core.lock().speed = speed;
        self.with_renderer(|renderer| renderer.set_speed(speed));
        Ok(())
    }

    pub fn set_skip_silence(&self, enabled: bool) {
        self.with_renderer(|renderer| renderer.set_skip_silence(enabled));
    }

    /// Ramp the fade multiplier to `request.target`
    ///
    /// Any fade already running on this engine is cancelled first, without
    /// its completion callback.
    pub fn fade_volume(&self, request: FadeRequest) -> Result<FadeHandle> {
        let (generation, start) = {
            let mut core = self.inner.core.lock();
            (core.fade.supersede(), core.volume.fade)
        };

        let plan = FadePlan::new(start, request.target, request.duration, request.interval);
        let inner: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let sink: Weak<dyn FadeSink> = inner;
        let handle = FadeHandle::spawn(sink, generation, plan, request)?;

        let mut core = self.inner.core.lock();
        if core.fade.generation == generation {
            core.fade.abort = Some(handle.abort_handle());
        } else {
            handle.abort_handle().abort();
        }
        Ok(handle)
    }

    /// Ramp the audible volume to `volume`
    ///
    /// The ramp runs on the fade multiplier; on completion it is folded
    /// into the base volume, leaving base at `volume` and the multiplier at
    /// one.
    pub fn animate_volume(
        &self,
        volume: f32,
        duration: Duration,
        interval: Duration,
        tag: Option<String>,
    ) -> Result<FadeHandle> {
        let volume = volume.clamp(0.0, 1.0);
        let target = {
            let mut core = self.inner.core.lock();
            let old_base = core.volume.base;
            let base = old_base.max(volume);
            if base > 0.0 {
                core.volume.fade *= old_base / base;
                core.volume.base = base;
                volume / base
            } else {
                1.0
            }
        };

        let engine = Arc::downgrade(&self.inner);
        let mut request = FadeRequest::new(target, duration, interval).on_complete(move || {
            if let Some(inner) = engine.upgrade() {
                let mut core = inner.core.lock();
                core.volume.base = volume;
                core.volume.fade = 1.0;
                inner.write_volume(&core);
            }
        });
        request.tag = tag;
        self.fade_volume(request)
    }

    pub fn cancel_fade(&self) {
        self.inner.core.lock().fade.supersede();
    }

    /// Record the queue index of the current item after a renumbering
    pub fn renumber(&self, index: Option<usize>) {
        self.inner.core.lock().index = index;
    }

    /// Swap in new display metadata without touching the renderer
    pub fn refresh_metadata(&self, metadata: MediaMetadata) {
        let refreshed = {
            let mut core = self.inner.core.lock();
            match core.item.as_ref() {
                Some(item) => {
                    core.item = Some(item.with_metadata(metadata.clone()));
                    true
                }
                None => false,
            }
        };
        if refreshed {
            self.inner.publish(PlayerEvent::CommonMetadata { metadata });
        }
    }

    /// Report the current state to subscribers, e.g. after becoming active
    pub fn announce_state(&self) {
        let state = self.state();
        self.inner.publish(PlayerEvent::StateChanged { state, previous: state });
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.core.lock().machine.current()
    }

    pub fn position(&self) -> Duration {
        Duration::from_millis(self.with_renderer(|renderer| renderer.position_ms()))
    }

    pub fn duration(&self) -> Option<Duration> {
        self.with_renderer(|renderer| renderer.duration_ms()).map(Duration::from_millis)
    }

    pub fn buffered_position(&self) -> Duration {
        Duration::from_millis(self.with_renderer(|renderer| renderer.buffered_position_ms()))
    }

    pub fn is_playing(&self) -> bool {
        self.with_renderer(|renderer| renderer.is_playing())
    }

    /// Caller-set base volume
    pub fn volume(&self) -> f32 {
        self.inner.core.lock().volume.base
    }

    pub fn effective_volume(&self) -> f32 {
        self.inner.core.lock().volume.effective()
    }

    pub fn fade_multiplier(&self) -> f32 {
        self.inner.core.lock().volume.fade
    }

    pub fn is_ducked(&self) -> bool {
        self.inner.core.lock().volume.ducked
    }

    pub fn playback_speed(&self) -> f32 {
        self.inner.core.lock().speed
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.core.lock().index
    }

    pub fn current_item(&self) -> Option<Item> {
        self.inner.core.lock().item.clone()
    }

    pub fn play_when_ready(&self) -> bool {
        self.inner.core.lock().play_when_ready
    }

    /// Last renderer error, until the next load or retry
    pub fn playback_error(&self) -> Option<RendererError> {
        self.inner.core.lock().error.clone()
    }

    /// Stop for good and release the renderer
    pub fn release(&self) {
        self.cancel_fade();
        if self.is_active() {
            self.inner.focus.abandon_focus_if_held();
        }
        self.stop();
        self.inner.renderer.lock().release();
        debug!("{} released", self.inner.id);
    }
}

impl std::fmt::Debug for RenderEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderEngine")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

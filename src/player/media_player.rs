//! High-level media player API for trackdeck
//!
//! This module provides the command surface bridge layers talk to. It
//! wraps the queue and the crossfade controller, keeps the active engine in
//! step with queue mutations, and owns the optional progress ticker.
//!
//! Queue mutations and commands that change which item plays wait for any
//! swap in flight to settle first; crossfade commands instead fail fast with
//! [`PlayerError::SwapInProgress`]. Volume and focus changes reach both
//! engines while a swap runs.

use crate::audio::{
    FadeHandle, FadeOutcome, FadeRequest, FocusChange, FocusController, FocusPlatform, GrantAllFocus, RendererFactory,
    RendererOptions, SimulatedBackend, VolumeMix,
};
use crate::internal_error;
use crate::media::{DefaultResolver, Item, MediaMetadata, SourceResolver};
use crate::player::controller::CrossfadeOptions;
use crate::player::engine::{EngineContext, Roles};
use crate::player::{
    CallbackSubscription, CrossfadeController, CurrentChange, CrossfadeTarget, EngineId, EventHub, EventKind, PlaybackState,
    PlayerEvent, PlayerSnapshot, QueueManager, RenderEngine, RepeatMode, SessionSink, Step, Subscription, SwapOutcome,
    TransitionReason,
};
use crate::utils::config::{Config, GeneralConfig, PlayerOptions};
use crate::utils::error::{PlayerError, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Media player builder for customized configuration
pub struct MediaPlayerBuilder {
    options: PlayerOptions,
    factory: Option<Arc<dyn RendererFactory>>,
    resolver: Option<Arc<dyn SourceResolver>>,
    focus: Option<Arc<dyn FocusPlatform>>,
    session: Option<Arc<dyn SessionSink>>,
}

impl MediaPlayerBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        Self {
            options: PlayerOptions::default(),
            factory: None,
            resolver: None,
            focus: None,
            session: None,
        }
    }

    pub fn with_options(mut self, options: PlayerOptions) -> Self {
        self.options = options;
        self
    }

    /// Take the player options of a loaded configuration
    pub fn with_config(self, config: &Config) -> Self {
        self.with_options(config.player.clone())
    }

    /// Renderer factory for both engines; the simulated backend by default
    pub fn with_renderer_factory(mut self, factory: Arc<dyn RendererFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SourceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Host focus capability; focus is always granted by default
    pub fn with_focus_platform(mut self, platform: Arc<dyn FocusPlatform>) -> Self {
        self.focus = Some(platform);
        self
    }

    pub fn with_session(mut self, session: Arc<dyn SessionSink>) -> Self {
        self.session = Some(session);
        self
    }

    /// Build the media player
    pub fn build(self) -> Result<MediaPlayer> {
        MediaPlayer::new_with_builder(self)
    }
}

impl Default for MediaPlayerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// High-level media player
pub struct MediaPlayer {
    options: PlayerOptions,
    queue: QueueManager,
    hub: EventHub,
    focus: Arc<FocusController>,
    crossfade: Arc<CrossfadeController>,
    progress: Mutex<Option<JoinHandle<()>>>,
}

impl MediaPlayer {
    /// Create a media player with default settings and the simulated backend
    pub fn new() -> Result<Self> {
        MediaPlayerBuilder::new().build()
    }

    pub fn builder() -> MediaPlayerBuilder {
        MediaPlayerBuilder::new()
    }

    fn new_with_builder(builder: MediaPlayerBuilder) -> Result<Self> {
        let options = builder.options;
        Config {
            player: options.clone(),
            general: GeneralConfig::default(),
        }
        .validate()?;

        info!("Initializing trackdeck media player");

        let hub = EventHub::new();
        let queue = QueueManager::new();
        let roles = Arc::new(Roles::new());
        let focus = Arc::new(FocusController::new(
            builder.focus.unwrap_or_else(|| Arc::new(GrantAllFocus)),
            options.handle_audio_focus,
            options.always_pause_on_interruption,
            hub.clone(),
        ));
        let factory = builder.factory.unwrap_or_else(|| Arc::new(SimulatedBackend::new()));
        let context = EngineContext {
            hub: hub.clone(),
            roles: roles.clone(),
            focus: focus.clone(),
            queue: queue.clone(),
            resolver: builder.resolver.unwrap_or_else(|| Arc::new(DefaultResolver::new())),
            volume: VolumeMix::new(options.default_volume, options.duck_volume),
        };

        let renderer_options = RendererOptions {
            buffer: options.buffer,
            skip_silence: options.skip_silence,
            cache_size_bytes: options.cache_size_bytes,
        };
        let engines = [
            RenderEngine::new(EngineId(0), factory.create(&renderer_options), context.clone()),
            RenderEngine::new(EngineId(1), factory.create(&renderer_options), context),
        ];

        let crossfade = Arc::new(CrossfadeController::new(
            engines,
            roles,
            queue.clone(),
            hub.clone(),
            CrossfadeOptions {
                duration: Duration::from_millis(options.crossfade_duration_ms),
                interval: Duration::from_millis(options.crossfade_interval_ms),
                target_volume: options.crossfade_target_volume,
            },
        ));
        if let Some(session) = builder.session {
            crossfade.attach_session(session);
        }

        let player = Self {
            options,
            queue,
            hub,
            focus,
            crossfade,
            progress: Mutex::new(None),
        };

        if let Some(ms) = player.options.progress_update_interval_ms {
            if let Err(e) = player.start_progress_updates(Duration::from_millis(ms)) {
                warn!("Progress updates disabled: {}", e);
            }
        }

        Ok(player)
    }

    pub fn options(&self) -> &PlayerOptions {
        &self.options
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn crossfade_controller(&self) -> &CrossfadeController {
        &self.crossfade
    }

    /// The audible engine
    pub fn active(&self) -> &RenderEngine {
        self.crossfade.active()
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Subscribe to every event
    pub fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    pub fn subscribe_to(&self, kinds: &[EventKind]) -> Subscription {
        self.hub.subscribe_to(kinds)
    }

    /// Run `callback` for every event on a dedicated thread
    pub fn subscribe_fn<F>(&self, callback: F) -> CallbackSubscription
    where
        F: Fn(&PlayerEvent) + Send + 'static,
    {
        self.hub.subscribe_fn(callback)
    }

    /// Read-only view computed from the active engine
    pub fn snapshot(&self) -> PlayerSnapshot {
        let engine = self.active();
        PlayerSnapshot {
            state: engine.state(),
            position: engine.position(),
            duration: engine.duration(),
            buffered_position: engine.buffered_position(),
            volume: engine.volume(),
            playback_speed: engine.playback_speed(),
            current_index: self.queue.current_index(),
            repeat_mode: self.queue.repeat_mode(),
            play_when_ready: engine.play_when_ready(),
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.active().state()
    }

    pub fn items(&self) -> Vec<Item> {
        self.queue.items()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.queue.current_index()
    }

    pub fn current_item(&self) -> Option<Item> {
        self.queue.current_item()
    }

    /// Load queue entry `index` on the active engine
    fn load_index(&self, index: usize, reason: TransitionReason, play_when_ready: bool) -> Result<()> {
        let item = self.queue.get(index)?;
        self.crossfade.discard_prepared();
        // Failures land in the Error state and a playback-error event
        self.active().load_entry(Some(index), item, reason, play_when_ready);
        Ok(())
    }

    /// Insert items before `at`, or append when `at` is `None`
    ///
    /// Adding to an empty queue loads the first new item without starting it.
    pub async fn add(&self, items: Vec<Item>, at: Option<usize>) -> Result<usize> {
        self.crossfade.settled().await;
        let was_empty = self.queue.is_empty();
        let count = items.len();
        let index = self.queue.add(items, at)?;
        self.crossfade.discard_prepared();

        if count > 0 {
            if was_empty {
                let play_when_ready = self.active().play_when_ready();
                self.load_index(0, TransitionReason::QueueChanged, play_when_ready)?;
            } else {
                self.active().renumber(self.queue.current_index());
            }
        }
        Ok(index)
    }

    pub async fn move_item(&self, from: usize, to: usize) -> Result<()> {
        self.crossfade.settled().await;
        self.queue.move_item(from, to)?;
        self.crossfade.discard_prepared();
        self.active().renumber(self.queue.current_index());
        Ok(())
    }

    /// Remove every listed index, or nothing if any is invalid
    ///
    /// Removing the current item moves playback to the next surviving item,
    /// else the previous one, else clears the engine.
    pub async fn remove(&self, indices: &[usize]) -> Result<Vec<Item>> {
        self.crossfade.settled().await;
        let outcome = self.queue.remove(indices)?;
        self.crossfade.discard_prepared();

        match outcome.current {
            CurrentChange::Unchanged => {}
            CurrentChange::Renumbered { to, .. } => self.active().renumber(Some(to)),
            CurrentChange::Replaced { to: Some(to), .. } => {
                let play_when_ready = self.active().play_when_ready();
                self.load_index(to, TransitionReason::QueueChanged, play_when_ready)?;
            }
            CurrentChange::Replaced { to: None, .. } => self.active().clear(),
        }
        Ok(outcome.removed)
    }

    /// Put `item` at `index`
    ///
    /// When `index` is playing and the locator is unchanged only the
    /// metadata is refreshed; otherwise the new source is loaded.
    pub async fn replace(&self, index: usize, item: Item) -> Result<()> {
        self.crossfade.settled().await;
        let old = self.queue.replace(index, item.clone())?;
        self.crossfade.discard_prepared();

        let active = self.active();
        if active.current_index() == Some(index) {
            if old.locator() == item.locator() {
                active.refresh_metadata(item.metadata().clone());
            } else {
                let play_when_ready = active.play_when_ready();
                self.load_index(index, TransitionReason::QueueChanged, play_when_ready)?;
            }
        }
        Ok(())
    }

    /// Play `item` in place of the current entry
    pub async fn load(&self, item: Item) -> Result<()> {
        self.crossfade.settled().await;
        match self.queue.current_index() {
            Some(index) => {
                self.queue.replace(index, item)?;
                let play_when_ready = self.active().play_when_ready();
                self.load_index(index, TransitionReason::QueueChanged, play_when_ready)
            }
            None => self.add(vec![item], None).await.map(|_| ()),
        }
    }

    pub async fn clear(&self) -> Result<()> {
        self.crossfade.settled().await;
        self.queue.clear();
        self.crossfade.discard_prepared();
        self.active().clear();
        Ok(())
    }

    pub async fn remove_upcoming(&self) -> usize {
        self.crossfade.settled().await;
        let removed = self.queue.remove_upcoming();
        self.crossfade.discard_prepared();
        removed
    }

    pub async fn remove_previous(&self) -> usize {
        self.crossfade.settled().await;
        let removed = self.queue.remove_previous();
        self.crossfade.discard_prepared();
        self.active().renumber(self.queue.current_index());
        removed
    }

    /// Start playback, loading the current entry if the engine has none
    pub fn play(&self) {
        let active = self.active();
        if active.current_item().is_none() {
            if let Some(index) = self.queue.current_index() {
                if let Err(e) = self.load_index(index, TransitionReason::QueueChanged, true) {
                    warn!("Cannot load current entry: {}", e);
                }
                return;
            }
        }
        active.play();
    }

    pub fn pause(&self) {
        self.active().pause();
    }

    pub fn stop(&self) {
        self.active().stop();
    }

    pub fn toggle_play(&self) {
        if self.active().play_when_ready() {
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

    pub fn seek_to(&self, position: Duration) -> Result<()> {
        self.active().seek_to(position)
    }

    /// Seek relative to the current position, in milliseconds
    pub fn seek_by(&self, offset_ms: i64) -> Result<()> {
        self.active().seek_by(offset_ms)
    }

    pub fn jump_forward(&self) -> Result<()> {
        self.seek_by(self.options.jump_interval_ms as i64)
    }

    pub fn jump_backward(&self) -> Result<()> {
        self.seek_by(-(self.options.jump_interval_ms as i64))
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(PlayerError::InvalidInput(format!("volume must be between 0.0 and 1.0, got {}", volume)));
        }
        for engine in self.crossfade.audible() {
            engine.set_volume(volume);
        }
        Ok(())
    }

    /// Set the playback speed of both engines
    pub fn set_rate(&self, rate: f32) -> Result<()> {
        self.active().set_playback_speed(rate)?;
        self.crossfade.standby().set_playback_speed(rate)
    }

    pub fn set_skip_silence(&self, enabled: bool) {
        self.active().set_skip_silence(enabled);
        self.crossfade.standby().set_skip_silence(enabled);
    }

    pub fn set_repeat_mode(&self, mode: RepeatMode) {
        self.queue.set_repeat_mode(mode);
        self.crossfade.discard_prepared();
    }

    pub fn repeat_mode(&self) -> RepeatMode {
        self.queue.repeat_mode()
    }

    /// Jump to `index`, optionally starting at `initial_position`
    pub async fn skip(&self, index: usize, initial_position: Option<Duration>) -> Result<()> {
        self.crossfade.settled().await;
        let item = self.queue.get(index)?;
        self.queue.jump_to(index)?;
        self.crossfade.discard_prepared();

        let active = self.active();
        let status = active.load_entry(Some(index), item, TransitionReason::Seek, active.play_when_ready());
        if let (true, Some(position)) = (status.is_loaded(), initial_position) {
            active.seek_to(position)?;
        }
        Ok(())
    }

    pub async fn next(&self, initial_position: Option<Duration>) -> Result<()> {
        self.crossfade.settled().await;
        let step = self.queue.next();
        self.step_to(step, initial_position)
    }

    pub async fn previous(&self, initial_position: Option<Duration>) -> Result<()> {
        self.crossfade.settled().await;
        let step = self.queue.previous();
        self.step_to(step, initial_position)
    }

    fn step_to(&self, step: Step, initial_position: Option<Duration>) -> Result<()> {
        let active = self.active();
        let (index, reason) = match step {
            Step::Empty => return Err(PlayerError::NoCurrentItem),
            Step::QueueEnded => {
                info!("Already at the last item");
                self.hub.publish(PlayerEvent::QueueEnded {
                    index: self.queue.current_index(),
                    position: active.position(),
                });
                return Ok(());
            }
            Step::Clamped(_) => {
                debug!("Already at the first item, restarting it");
                return active.seek_to(initial_position.unwrap_or(Duration::ZERO));
            }
            Step::To { to, .. } => (to, TransitionReason::Seek),
            Step::Repeat(index) => (index, TransitionReason::Repeat),
        };

        let item = self.queue.get(index)?;
        self.crossfade.discard_prepared();
        let status = active.load_entry(Some(index), item, reason, active.play_when_ready());
        if let (true, Some(position)) = (status.is_loaded(), initial_position) {
            active.seek_to(position)?;
        }
        Ok(())
    }

    pub async fn crossfade_next(&self) -> Result<SwapOutcome> {
        self.crossfade.crossfade(CrossfadeTarget::Next).await
    }

    pub async fn crossfade_previous(&self) -> Result<SwapOutcome> {
        self.crossfade.crossfade(CrossfadeTarget::Previous).await
    }

    pub async fn crossfade_to(&self, index: usize) -> Result<SwapOutcome> {
        self.crossfade.crossfade(CrossfadeTarget::Index(index)).await
    }

    /// Preload the standby engine for a later crossfade
    pub async fn crossfade_prepare(&self, target: CrossfadeTarget) -> Result<Option<usize>> {
        self.crossfade.prepare(target).await
    }

    pub async fn retry(&self) -> Result<()> {
        self.crossfade.settled().await;
        self.active().retry()
    }

    /// Stop, let playback settle, then drop the queue
    pub async fn reset(&self) -> Result<()> {
        self.crossfade.settled().await;
        self.active().stop();
        tokio::time::sleep(Duration::from_millis(self.options.reset_settle_ms)).await;
        self.queue.clear();
        self.crossfade.discard_prepared();
        self.active().clear();
        self.crossfade.standby().reset();
        Ok(())
    }

    /// Fade the active engine out over `duration` (the crossfade duration
    /// when unset), run `then`, and restore the fade multiplier
    async fn fade_out_then(&self, duration: Option<Duration>, then: impl FnOnce(&Self) -> Result<()>) -> Result<FadeOutcome> {
        self.crossfade.settled().await;
        let duration = duration.unwrap_or(Duration::from_millis(self.options.crossfade_duration_ms));
        let interval = Duration::from_millis(self.options.crossfade_interval_ms);

        let handle = self.active().fade_volume(FadeRequest::new(0.0, duration, interval))?;
        let outcome = handle.finished().await;
        if outcome == FadeOutcome::Cancelled {
            return Ok(outcome);
        }

        let result = then(self);
        self.active().set_fade_multiplier(1.0);
        result.map(|_| outcome)
    }

    pub async fn fade_out_pause(&self, duration: Option<Duration>) -> Result<FadeOutcome> {
        self.fade_out_then(duration, |player| {
            player.pause();
            Ok(())
        })
        .await
    }

    pub async fn fade_out_next(&self, duration: Option<Duration>) -> Result<FadeOutcome> {
        self.fade_out_then(duration, |player| {
            let step = player.queue.next();
            player.step_to(step, None)
        })
        .await
    }

    pub async fn fade_out_previous(&self, duration: Option<Duration>) -> Result<FadeOutcome> {
        self.fade_out_then(duration, |player| {
            let step = player.queue.previous();
            player.step_to(step, None)
        })
        .await
    }

    pub async fn fade_out_jump(&self, index: usize, duration: Option<Duration>) -> Result<FadeOutcome> {
        self.queue.get(index)?;
        self.fade_out_then(duration, |player| {
            player.queue.jump_to(index)?;
            let active = player.active();
            player.load_index(index, TransitionReason::Seek, active.play_when_ready())
        })
        .await
    }

    /// Ramp the audible volume to `volume`, then publish
    /// `volume-fade-completed` with `tag`
    pub fn set_animated_volume(
        &self,
        volume: f32,
        duration: Duration,
        interval: Duration,
        tag: impl Into<String>,
    ) -> Result<FadeHandle> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(PlayerError::InvalidInput(format!("volume must be between 0.0 and 1.0, got {}", volume)));
        }
        self.active().animate_volume(volume, duration, interval, Some(tag.into()))
    }

    /// Replace the display metadata of the playing entry
    pub fn update_now_playing(&self, metadata: MediaMetadata) -> Result<()> {
        let index = self.queue.current_index().ok_or(PlayerError::NoCurrentItem)?;
        let item = self.queue.get(index)?.with_metadata(metadata.clone());
        self.queue.replace(index, item)?;
        self.active().refresh_metadata(metadata);
        Ok(())
    }

    /// Platform callback: audio focus changed
    pub fn on_audio_focus_change(&self, change: FocusChange) {
        let action = self.focus.on_focus_change(change);
        debug!("Focus change {:?} -> {:?}", change, action);
        for engine in self.crossfade.audible() {
            engine.apply_focus(action);
        }
    }

    /// Publish progress events every `interval` while playing
    pub fn start_progress_updates(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(PlayerError::InvalidInput("progress interval must be non-zero".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| internal_error!("progress updates need a tokio runtime"))?;

        let controller = Arc::downgrade(&self.crossfade);
        let hub = self.hub.clone();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(controller) = controller.upgrade() else { break };
                let engine = controller.active();
                if engine.state() != PlaybackState::Playing {
                    continue;
                }
                hub.publish(PlayerEvent::Progress {
                    position: engine.position(),
                    duration: engine.duration(),
                    buffered_position: engine.buffered_position(),
                    index: engine.current_index(),
                });
            }
        });

        if let Some(previous) = self.progress.lock().replace(task) {
            previous.abort();
        }
        debug!("Progress updates every {:?}", interval);
        Ok(())
    }

    pub fn stop_progress_updates(&self) {
        if let Some(task) = self.progress.lock().take() {
            task.abort();
        }
    }

    /// Tear the player down: stop both engines and give up audio focus
    pub async fn destroy(&self) {
        info!("Destroying media player");
        self.stop_progress_updates();
        self.crossfade.settled().await;
        self.crossfade.release();
        self.focus.abandon_focus_if_held();
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        self.stop_progress_updates();
    }
}

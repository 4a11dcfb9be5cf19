//! Simulated renderer for trackdeck
//!
//! A deterministic in-process [`Renderer`] that behaves like a native
//! renderer without decoding anything: it buffers, becomes ready, advances
//! its position on the tokio clock while playing, and reports everything
//! through its listener. A [`SimulatedControl`] drives the things a real
//! renderer would discover on its own, such as reaching the end of the
//! media or failing mid-stream.

use crate::audio::{
    NativeDiscontinuityReason, NativeMetadata, NativePlayWhenReadyReason, NativeState, NativeTransitionReason,
    Renderer, RendererError, RendererFactory, RendererListener, RendererOptions,
};
use crate::media::{MediaMetadata, MetadataEntry, ResolvedSource};
use log::{debug, trace};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Duration reported for sources that do not declare one
const DEFAULT_DURATION_MS: u64 = 180_000;

enum Emit {
    State(NativeState),
    Transition(NativeTransitionReason),
    Discontinuity(u64, u64, NativeDiscontinuityReason),
    PlayWhenReady(bool, NativePlayWhenReadyReason),
    Playing(bool),
    Metadata(NativeMetadata),
    Error(RendererError),
}

struct SimState {
    options: RendererOptions,
    source: Option<ResolvedSource>,
    native: NativeState,
    play_when_ready: bool,
    playing: bool,
    anchor_ms: u64,
    anchor_at: Option<Instant>,
    duration_ms: Option<u64>,
    volume: f32,
    speed: f32,
    skip_silence: bool,
    auto_ready: bool,
    opened: Vec<String>,
    released: bool,
}

impl SimState {
    fn new(options: RendererOptions) -> Self {
        Self {
            options,
            source: None,
            native: NativeState::Idle,
            play_when_ready: false,
            playing: false,
            anchor_ms: 0,
            anchor_at: None,
            duration_ms: None,
            volume: 1.0,
            speed: 1.0,
            skip_silence: options.skip_silence,
            auto_ready: true,
            opened: Vec::new(),
            released: false,
        }
    }

    fn position(&self) -> u64 {
        let position = match self.anchor_at {
            Some(at) => self.anchor_ms + (at.elapsed().as_millis() as f64 * self.speed as f64) as u64,
            None => self.anchor_ms,
        };
        self.duration_ms.map_or(position, |duration| position.min(duration))
    }

    fn set_playing(&mut self, playing: bool, emits: &mut Vec<Emit>) {
        if self.playing == playing {
            return;
        }
        if playing {
            self.anchor_at = Some(Instant::now());
        } else {
            self.anchor_ms = self.position();
            self.anchor_at = None;
        }
        self.playing = playing;
        emits.push(Emit::Playing(playing));
    }

    fn set_play_when_ready(&mut self, value: bool, emits: &mut Vec<Emit>) {
        if self.play_when_ready != value {
            self.play_when_ready = value;
            emits.push(Emit::PlayWhenReady(value, NativePlayWhenReadyReason::UserRequest));
        }
    }

    fn set_native(&mut self, state: NativeState, emits: &mut Vec<Emit>) {
        if self.native != state {
            self.native = state;
            emits.push(Emit::State(state));
        }
    }

    fn become_ready(&mut self, emits: &mut Vec<Emit>) {
        self.set_native(NativeState::Ready, emits);
        if self.play_when_ready {
            self.set_playing(true, emits);
        }
    }

    fn start_buffering(&mut self, emits: &mut Vec<Emit>) {
        self.set_playing(false, emits);
        self.set_native(NativeState::Buffering, emits);
        if self.auto_ready {
            self.become_ready(emits);
        }
    }

    fn finish(&mut self, emits: &mut Vec<Emit>) {
        if self.source.is_none() {
            return;
        }
        self.set_playing(false, emits);
        self.anchor_ms = self.duration_ms.unwrap_or(self.anchor_ms);
        self.set_native(NativeState::Ended, emits);
    }
}

#[derive(Default)]
struct ListenerSlot(RwLock<Option<Arc<dyn RendererListener>>>);

impl ListenerSlot {
    fn dispatch(&self, emits: Vec<Emit>) {
        if emits.is_empty() {
            return;
        }
        let Some(listener) = self.0.read().clone() else { return };
        for emit in emits {
            match emit {
                Emit::State(state) => listener.on_state_changed(state),
                Emit::Transition(reason) => listener.on_item_transition(reason),
                Emit::Discontinuity(old, new, reason) => listener.on_position_discontinuity(old, new, reason),
                Emit::PlayWhenReady(value, reason) => listener.on_play_when_ready_changed(value, reason),
                Emit::Playing(playing) => listener.on_is_playing_changed(playing),
                Emit::Metadata(metadata) => listener.on_metadata(metadata),
                Emit::Error(error) => listener.on_error(error),
            }
        }
    }
}

/// In-process renderer with deterministic behaviour
pub struct SimulatedRenderer {
    state: Arc<Mutex<SimState>>,
    listener: Arc<ListenerSlot>,
    unplayable: Arc<Mutex<HashSet<String>>>,
}

impl SimulatedRenderer {
    /// Create a renderer and the control that drives it
    pub fn new(options: RendererOptions) -> (Self, SimulatedControl) {
        Self::with_unplayable(options, Arc::new(Mutex::new(HashSet::new())))
    }

    fn with_unplayable(options: RendererOptions, unplayable: Arc<Mutex<HashSet<String>>>) -> (Self, SimulatedControl) {
        let renderer = Self {
            state: Arc::new(Mutex::new(SimState::new(options))),
            listener: Arc::new(ListenerSlot::default()),
            unplayable,
        };
        let control = SimulatedControl {
            state: renderer.state.clone(),
            listener: renderer.listener.clone(),
            unplayable: renderer.unplayable.clone(),
        };
        (renderer, control)
    }

    /// Run `f` against the state, then report what it emitted with the lock released
    fn update<R>(&self, f: impl FnOnce(&mut SimState, &mut Vec<Emit>) -> R) -> R {
        let mut emits = Vec::new();
        let result = {
            let mut state = self.state.lock();
            f(&mut state, &mut emits)
        };
        self.listener.dispatch(emits);
        result
    }
}

impl Renderer for SimulatedRenderer {
    fn set_listener(&mut self, listener: Arc<dyn RendererListener>) {
        *self.listener.0.write() = Some(listener);
    }

    fn open(&mut self, source: &ResolvedSource, play_when_ready: bool) -> Result<(), RendererError> {
        if self.unplayable.lock().contains(&source.uri) {
            return Err(RendererError::new(
                "ERROR_CODE_IO_FILE_NOT_FOUND",
                format!("cannot open {}", source.uri),
            ));
        }

        self.update(|state, emits| {
            if state.released {
                return Err(RendererError::new("ERROR_CODE_RELEASED", "renderer was released"));
            }
            debug!("Simulated renderer opening {}", source.uri);

            state.set_playing(false, emits);
            state.source = Some(source.clone());
            state.anchor_ms = 0;
            state.anchor_at = None;
            state.duration_ms = Some(
                source
                    .metadata
                    .duration
                    .map_or(DEFAULT_DURATION_MS, |duration| duration.as_millis() as u64),
            );
            state.opened.push(source.uri.clone());
            state.set_play_when_ready(play_when_ready, emits);

            emits.push(Emit::Transition(NativeTransitionReason::PlaylistChanged));
            emits.push(Emit::Metadata(NativeMetadata::Common(source.metadata.clone())));
            // a fresh source always starts buffering from scratch
            state.native = NativeState::Idle;
            state.start_buffering(emits);
            Ok(())
        })
    }

    fn prepare(&mut self) -> Result<(), RendererError> {
        self.update(|state, emits| {
            if state.source.is_none() || state.released {
                return Err(RendererError::new("ERROR_CODE_NO_SOURCE", "nothing to prepare"));
            }
            if matches!(state.native, NativeState::Idle | NativeState::Ended) {
                if state.native == NativeState::Ended {
                    state.anchor_ms = 0;
                }
                state.start_buffering(emits);
            }
            Ok(())
        })
    }

    fn play(&mut self) {
        self.update(|state, emits| {
            state.set_play_when_ready(true, emits);
            if state.source.is_none() {
                return;
            }
            match state.native {
                NativeState::Ready => state.set_playing(true, emits),
                NativeState::Idle => state.start_buffering(emits),
                NativeState::Ended => {
                    state.anchor_ms = 0;
                    state.start_buffering(emits);
                }
                NativeState::Buffering => {}
            }
        });
    }

    fn pause(&mut self) {
        self.update(|state, emits| {
            state.set_play_when_ready(false, emits);
            state.set_playing(false, emits);
        });
    }

    fn stop(&mut self) {
        self.update(|state, emits| {
            state.set_playing(false, emits);
            state.set_native(NativeState::Idle, emits);
        });
    }

    fn clear(&mut self) {
        self.update(|state, emits| {
            state.set_playing(false, emits);
            let had_source = state.source.take().is_some();
            state.anchor_ms = 0;
            state.duration_ms = None;
            state.set_native(NativeState::Idle, emits);
            if had_source {
                emits.push(Emit::Transition(NativeTransitionReason::PlaylistChanged));
            }
        });
    }

    fn seek_to(&mut self, position_ms: u64) {
        self.update(|state, emits| {
            if state.source.is_none() {
                return;
            }
            let old = state.position();
            let target = state.duration_ms.map_or(position_ms, |duration| position_ms.min(duration));
            state.anchor_ms = target;
            if state.playing {
                state.anchor_at = Some(Instant::now());
            }
            emits.push(Emit::Discontinuity(old, target, NativeDiscontinuityReason::Seek));
            if state.native == NativeState::Ended && Some(target) < state.duration_ms {
                state.start_buffering(emits);
            }
        });
    }

    fn set_volume(&mut self, volume: f32) {
        trace!("Simulated renderer volume {:.3}", volume);
        self.state.lock().volume = volume;
    }

    fn set_speed(&mut self, speed: f32) {
        let mut state = self.state.lock();
        state.anchor_ms = state.position();
        if state.playing {
            state.anchor_at = Some(Instant::now());
        }
        state.speed = speed;
    }

    fn set_skip_silence(&mut self, enabled: bool) {
        self.state.lock().skip_silence = enabled;
    }

    fn position_ms(&self) -> u64 {
        self.state.lock().position()
    }

    fn duration_ms(&self) -> Option<u64> {
        self.state.lock().duration_ms
    }

    fn buffered_position_ms(&self) -> u64 {
        let state = self.state.lock();
        if state.source.is_none() {
            return 0;
        }
        let ahead = state.position() + state.options.buffer.max_ms;
        state.duration_ms.map_or(ahead, |duration| ahead.min(duration))
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn release(&mut self) {
        {
            let mut state = self.state.lock();
            state.playing = false;
            state.anchor_at = None;
            state.source = None;
            state.released = true;
        }
        *self.listener.0.write() = None;
        debug!("Simulated renderer released");
    }
}

/// Remote control of one simulated renderer
#[derive(Clone)]
pub struct SimulatedControl {
    state: Arc<Mutex<SimState>>,
    listener: Arc<ListenerSlot>,
    unplayable: Arc<Mutex<HashSet<String>>>,
}

impl SimulatedControl {
    fn update<R>(&self, f: impl FnOnce(&mut SimState, &mut Vec<Emit>) -> R) -> R {
        let mut emits = Vec::new();
        let result = {
            let mut state = self.state.lock();
            f(&mut state, &mut emits)
        };
        self.listener.dispatch(emits);
        result
    }

    /// Reach the end of the current source
    pub fn finish(&self) {
        self.update(|state, emits| state.finish(emits));
    }

    /// Finish the source once the clock has run past its duration
    pub fn tick(&self) -> bool {
        self.update(|state, emits| {
            let due = state.playing && state.duration_ms.is_some_and(|duration| state.position() >= duration);
            if due {
                state.finish(emits);
            }
            due
        })
    }

    /// Tick every `interval` until the returned task is aborted
    pub fn spawn_clock(&self, interval: Duration) -> JoinHandle<()> {
        let control = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                control.tick();
            }
        })
    }

    /// Fail mid-stream with a native error code
    pub fn fail(&self, code: &str, message: &str) {
        let error = RendererError::new(code, message);
        self.update(|state, emits| {
            state.set_playing(false, emits);
            emits.push(Emit::Error(error));
            state.set_native(NativeState::Idle, emits);
        });
    }

    /// Start or stop a rebuffering stall
    pub fn set_buffering(&self, buffering: bool) {
        self.update(|state, emits| {
            if state.source.is_none() {
                return;
            }
            if buffering && state.native == NativeState::Ready {
                state.set_playing(false, emits);
                state.set_native(NativeState::Buffering, emits);
            } else if !buffering && state.native == NativeState::Buffering {
                state.become_ready(emits);
            }
        });
    }

    /// Whether opened sources become ready immediately
    pub fn set_auto_ready(&self, auto_ready: bool) {
        self.state.lock().auto_ready = auto_ready;
    }

    /// Make every renderer sharing this control's backend refuse `uri`
    pub fn mark_unplayable(&self, uri: &str) {
        self.unplayable.lock().insert(uri.to_string());
    }

    pub fn emit_timed_metadata(&self, entries: Vec<MetadataEntry>) {
        self.listener.dispatch(vec![Emit::Metadata(NativeMetadata::Timed(entries))]);
    }

    pub fn emit_common_metadata(&self, metadata: MediaMetadata) {
        self.listener.dispatch(vec![Emit::Metadata(NativeMetadata::Common(metadata))]);
    }

    pub fn volume(&self) -> f32 {
        self.state.lock().volume
    }

    pub fn speed(&self) -> f32 {
        self.state.lock().speed
    }

    pub fn skip_silence(&self) -> bool {
        self.state.lock().skip_silence
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn play_when_ready(&self) -> bool {
        self.state.lock().play_when_ready
    }

    pub fn native_state(&self) -> NativeState {
        self.state.lock().native
    }

    pub fn position(&self) -> Duration {
        Duration::from_millis(self.state.lock().position())
    }

    pub fn current_uri(&self) -> Option<String> {
        self.state.lock().source.as_ref().map(|source| source.uri.clone())
    }

    /// Every URI opened so far, in order
    pub fn opened(&self) -> Vec<String> {
        self.state.lock().opened.clone()
    }

    pub fn buffer(&self) -> crate::utils::config::BufferBounds {
        self.state.lock().options.buffer
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }
}

struct BackendInner {
    controls: Mutex<Vec<SimulatedControl>>,
    unplayable: Arc<Mutex<HashSet<String>>>,
}

/// Renderer factory producing simulated renderers
///
/// Clones share the same renderers, so a test can keep one clone and reach
/// the controls of the renderers the player created.
#[derive(Clone)]
pub struct SimulatedBackend {
    inner: Arc<BackendInner>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BackendInner {
                controls: Mutex::new(Vec::new()),
                unplayable: Arc::new(Mutex::new(HashSet::new())),
            }),
        }
    }

    /// Control of the `index`-th renderer created
    pub fn control(&self, index: usize) -> Option<SimulatedControl> {
        self.inner.controls.lock().get(index).cloned()
    }

    pub fn controls(&self) -> Vec<SimulatedControl> {
        self.inner.controls.lock().clone()
    }

    /// Refuse `uri` in every renderer of this backend
    pub fn mark_unplayable(&self, uri: &str) {
        self.inner.unplayable.lock().insert(uri.to_string());
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RendererFactory for SimulatedBackend {
    fn create(&self, options: &RendererOptions) -> Box<dyn Renderer> {
        let (renderer, control) = SimulatedRenderer::with_unplayable(*options, self.inner.unplayable.clone());
        self.inner.controls.lock().push(control);
        Box::new(renderer)
    }
}

//! Audio output module for trackdeck
//!
//! This module defines the seam between the playback core and whatever
//! native renderer actually produces sound: the [`Renderer`] capability,
//! the [`RendererListener`] callback interface it reports through, volume
//! and fade primitives, and audio focus arbitration.

mod focus;
mod simulated;
mod volume;

pub use focus::{FocusAction, FocusChange, FocusController, FocusGrant, FocusPlatform, GrantAllFocus};
pub use simulated::{SimulatedBackend, SimulatedControl, SimulatedRenderer};
pub use volume::{FadeHandle, FadeOutcome, FadePlan, FadeRequest, FadeSink, VolumeMix};

use crate::media::{MediaMetadata, MetadataEntry, ResolvedSource};
use crate::utils::config::BufferBounds;
use std::sync::Arc;
use thiserror::Error;

/// Renderer trait defining the interface of one native media renderer
///
/// Every method is called from the owning engine only, one call at a time.
/// Implementations report what happens through the listener installed with
/// [`Renderer::set_listener`]; they may invoke it synchronously from inside
/// any of these methods.
pub trait Renderer: Send {
    /// Install the single callback sink for this renderer
    fn set_listener(&mut self, listener: Arc<dyn RendererListener>);

    /// Replace the current source and start preparing it
    ///
    /// # Arguments
    ///
    /// * `source` - Stream to open
    /// * `play_when_ready` - Start playing once enough data is buffered
    fn open(&mut self, source: &ResolvedSource, play_when_ready: bool) -> Result<(), RendererError>;

    /// Prepare the current source again after a stop or an error
    fn prepare(&mut self) -> Result<(), RendererError>;

    /// Set play-when-ready and start playback if possible
    fn play(&mut self);

    /// Clear play-when-ready, keeping buffered data
    fn pause(&mut self);

    /// Stop playback and release decoding resources, keeping the source
    fn stop(&mut self);

    /// Drop the current source entirely
    fn clear(&mut self);

    /// Seek within the current source
    fn seek_to(&mut self, position_ms: u64);

    /// Set output gain (0.0 to 1.0)
    fn set_volume(&mut self, volume: f32);

    fn set_speed(&mut self, speed: f32);

    fn set_skip_silence(&mut self, enabled: bool);

    /// Current playback position in milliseconds
    fn position_ms(&self) -> u64;

    /// Duration of the current source, if known
    fn duration_ms(&self) -> Option<u64>;

    fn buffered_position_ms(&self) -> u64;

    /// Whether audio is actually being produced
    fn is_playing(&self) -> bool;

    /// Release the renderer for good
    fn release(&mut self);
}

/// Native callback interface of a renderer
///
/// Implemented once per engine; translates into player events.
pub trait RendererListener: Send + Sync {
    fn on_state_changed(&self, state: NativeState);

    /// The renderer switched to a different media item
    fn on_item_transition(&self, reason: NativeTransitionReason);

    fn on_position_discontinuity(&self, old_position_ms: u64, new_position_ms: u64, reason: NativeDiscontinuityReason);

    fn on_play_when_ready_changed(&self, play_when_ready: bool, reason: NativePlayWhenReadyReason);

    fn on_is_playing_changed(&self, is_playing: bool);

    fn on_metadata(&self, metadata: NativeMetadata);

    fn on_error(&self, error: RendererError);
}

/// Creates one renderer per engine
pub trait RendererFactory: Send + Sync {
    fn create(&self, options: &RendererOptions) -> Box<dyn Renderer>;
}

/// Options handed to every renderer the factory creates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererOptions {
    pub buffer: BufferBounds,
    pub skip_silence: bool,
    pub cache_size_bytes: u64,
}

/// Coarse state reported by a renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeState {
    Idle,
    Buffering,
    Ready,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeTransitionReason {
    /// Previous item played to its end
    Auto,
    /// Seek to another item
    Seek,
    /// Item list changed
    PlaylistChanged,
    Repeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeDiscontinuityReason {
    AutoTransition,
    Seek,
    SeekAdjustment,
    Skip,
    Remove,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativePlayWhenReadyReason {
    UserRequest,
    AudioFocusLoss,
    AudioBecomingNoisy,
    Remote,
    EndOfMediaItem,
}

/// Metadata reported by a renderer
#[derive(Debug, Clone, PartialEq)]
pub enum NativeMetadata {
    /// Metadata embedded in the stream at a point in time
    Timed(Vec<MetadataEntry>),
    /// Container-level metadata of the current item
    Common(MediaMetadata),
}

/// Error reported by a renderer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct RendererError {
    /// Native error constant, such as `ERROR_CODE_IO_FILE_NOT_FOUND`
    pub code: String,
    pub message: String,
}

impl RendererError {
    pub fn new<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Bridge-facing code: `ERROR_CODE_IO_NETWORK_CONNECTION_FAILED` becomes
    /// `io-network-connection-failed`
    pub fn normalized_code(&self) -> String {
        let code = self.code.trim();
        let code = code.strip_prefix("ERROR_CODE_").unwrap_or(code);
        code.to_ascii_lowercase().replace('_', "-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_error_code() {
        let err = RendererError::new("ERROR_CODE_IO_NETWORK_CONNECTION_FAILED", "offline");
        assert_eq!(err.normalized_code(), "io-network-connection-failed");

        let err = RendererError::new("DECODER_INIT_FAILED", "no codec");
        assert_eq!(err.normalized_code(), "decoder-init-failed");
        assert_eq!(err.to_string(), "DECODER_INIT_FAILED: no codec");
    }
}

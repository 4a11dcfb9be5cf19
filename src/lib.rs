//! trackdeck - a playback queue and crossfade engine
//!
//! The crate drives two media renderers through one ordered queue. Only one
//! renderer is audible at a time; a crossfade loads the next item on the
//! standby renderer, fades the two against each other and swaps their roles.
//! Every observable change is published through [`player::EventHub`].

pub mod audio;
pub mod media;
pub mod player;
pub mod utils;

pub use audio::{Renderer, RendererFactory, SimulatedBackend};
pub use media::{Item, MediaMetadata};
pub use player::{MediaPlayer, MediaPlayerBuilder, PlaybackState, PlayerEvent, PlayerSnapshot, RepeatMode};
pub use utils::{Config, PlayerError, PlayerOptions, Result};

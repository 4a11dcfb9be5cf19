//! Integration test utilities for trackdeck
//!
//! This module provides common utilities for integration testing including:
//! - Test media file generation
//! - A player rig wired to the simulated renderer
//! - Mock implementations of host capabilities

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use trackdeck::audio::{SimulatedBackend, SimulatedControl};
use trackdeck::media::{DefaultResolver, Item};
use trackdeck::player::{EngineId, MediaPlayer, MediaPlayerBuilder, PlaybackState, PlayerEvent, Subscription};
use trackdeck::utils::PlayerOptions;

/// Test fixture for integration tests
pub struct TestFixture {
    pub temp_dir: TempDir,
    pub tracks: Vec<Track>,
}

/// A generated WAV file and its length
pub struct Track {
    pub path: PathBuf,
    pub duration: Duration,
}

impl Track {
    /// Queue item pointing at the file, titled after its stem
    pub fn item(&self) -> Item {
        let title = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        Item::builder(format!("file://{}", self.path.display()))
            .title(title)
            .duration(self.duration)
            .build()
            .expect("fixture items are valid")
    }
}

impl TestFixture {
    /// Create a fixture with three short tones
    pub fn new() -> Result<Self> {
        let temp_dir = TempDir::new()?;
        let tracks = vec![
            write_tone(temp_dir.path(), "tone_a", 2.0, 440.0)?,
            write_tone(temp_dir.path(), "tone_b", 3.0, 550.0)?,
            write_tone(temp_dir.path(), "tone_c", 1.0, 660.0)?,
        ];

        Ok(Self { temp_dir, tracks })
    }

    /// Get the path to the temporary directory
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn items(&self) -> Vec<Item> {
        self.tracks.iter().map(Track::item).collect()
    }

    /// Item for a file that was never written
    pub fn missing_item(&self) -> Item {
        Item::builder(format!("file://{}", self.path().join("missing.wav").display()))
            .title("missing")
            .build()
            .expect("fixture items are valid")
    }
}

/// Write a mono sine tone and read its length back from the header
pub fn write_tone(dir: &Path, name: &str, seconds: f32, frequency: f32) -> Result<Track> {
    let path = dir.join(format!("{}.wav", name));
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(&path, spec)?;
    let samples = (seconds * spec.sample_rate as f32) as u32;
    for n in 0..samples {
        let t = n as f32 / spec.sample_rate as f32;
        let sample = (t * frequency * 2.0 * std::f32::consts::PI).sin();
        writer.write_sample((sample * i16::MAX as f32 * 0.5) as i16)?;
    }
    writer.finalize()?;

    let duration = wav_duration(&path)?;
    Ok(Track { path, duration })
}

pub fn wav_duration(path: &Path) -> Result<Duration> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    Ok(Duration::from_secs_f64(reader.duration() as f64 / spec.sample_rate as f64))
}

/// Options with short fades so paused-clock tests stay quick
pub fn fast_options() -> PlayerOptions {
    PlayerOptions {
        crossfade_duration_ms: 400,
        crossfade_interval_ms: 20,
        reset_settle_ms: 50,
        ..PlayerOptions::default()
    }
}

/// A player on the simulated backend with an event subscription
pub struct PlayerRig {
    pub player: MediaPlayer,
    pub backend: SimulatedBackend,
    pub events: Subscription,
}

impl PlayerRig {
    pub fn new(options: PlayerOptions) -> Result<Self> {
        Self::with_builder(MediaPlayer::builder().with_options(options))
    }

    /// Finish `builder` with the simulated backend and a resolver that
    /// rejects missing local files
    pub fn with_builder(builder: MediaPlayerBuilder) -> Result<Self> {
        let backend = SimulatedBackend::new();
        let player = builder
            .with_renderer_factory(Arc::new(backend.clone()))
            .with_resolver(Arc::new(DefaultResolver::new().with_local_file_check(true)))
            .build()?;
        let events = player.subscribe();
        Ok(Self { player, backend, events })
    }

    pub fn control(&self, id: EngineId) -> SimulatedControl {
        self.backend.control(id.0).expect("both engines are created at build time")
    }

    pub fn active_control(&self) -> SimulatedControl {
        self.control(self.player.active().id())
    }

    /// Run the simulated clock on both renderers
    pub fn start_clocks(&self, interval: Duration) -> Vec<tokio::task::JoinHandle<()>> {
        self.backend
            .controls()
            .iter()
            .map(|control| control.spawn_clock(interval))
            .collect()
    }
}

/// States announced in `events`, in order
pub fn states(events: &[PlayerEvent]) -> Vec<PlaybackState> {
    events
        .iter()
        .filter_map(|event| match event {
            PlayerEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

/// Mocks of the host capabilities
pub mod mocks {
    use mockall::mock;
    use trackdeck::audio::{FocusGrant, FocusPlatform};
    use trackdeck::player::{SessionSink, TransportControls};

    mock! {
        pub Focus {}

        impl FocusPlatform for Focus {
            fn request_focus(&self) -> FocusGrant;
            fn abandon_focus(&self);
        }
    }

    mock! {
        pub Session {}

        impl SessionSink for Session {
            fn attach(&self, controls: TransportControls);
        }
    }
}

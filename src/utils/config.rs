//! Configuration management for trackdeck
//!
//! This module handles loading the player options from config files and
//! environment variables. Every section is `#[serde(default)]`, so a file
//! only needs to name the keys it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::utils::error::{IntoPlayerError, PlayerError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Player and crossfade options
    pub player: PlayerOptions,

    /// General application settings
    pub general: GeneralConfig,
}

/// Options recognised by the playback core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    /// Request and abandon audio focus automatically
    pub handle_audio_focus: bool,

    /// Pause instead of ducking on transient focus loss
    pub always_pause_on_interruption: bool,

    /// Size of the renderer's media cache (0 disables it)
    pub cache_size_bytes: u64,

    /// Renderer buffering bounds
    pub buffer: BufferBounds,

    /// Skip silent passages
    pub skip_silence: bool,

    /// Length of each half of a crossfade
    pub crossfade_duration_ms: u64,

    /// Step interval of crossfade ramps
    pub crossfade_interval_ms: u64,

    /// Fade multiplier the incoming engine ramps up to
    pub crossfade_target_volume: f32,

    /// Base volume for new engines (0.0 - 1.0)
    pub default_volume: f32,

    /// Gain applied while ducked
    pub duck_volume: f32,

    /// How long reset() waits for playback to settle before clearing
    pub reset_settle_ms: u64,

    /// Step used by jump_forward / jump_backward
    pub jump_interval_ms: u64,

    /// Interval of progress events, disabled when unset
    pub progress_update_interval_ms: Option<u64>,
}

/// Renderer buffering bounds, all in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferBounds {
    pub min_ms: u64,
    pub max_ms: u64,
    /// Buffered media needed before playback resumes
    pub play_ms: u64,
    /// Back buffer kept behind the playhead
    pub back_ms: u64,
}

/// General application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Start playing once the queue is loaded
    pub auto_play: bool,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            handle_audio_focus: true,
            always_pause_on_interruption: false,
            cache_size_bytes: 0,
            buffer: BufferBounds::default(),
            skip_silence: false,
            crossfade_duration_ms: 2500,
            crossfade_interval_ms: 20,
            crossfade_target_volume: 1.0,
            default_volume: 1.0,
            duck_volume: 0.2,
            reset_settle_ms: 300,
            jump_interval_ms: 15_000,
            progress_update_interval_ms: None,
        }
    }
}

impl Default for BufferBounds {
    fn default() -> Self {
        Self {
            min_ms: 50_000,
            max_ms: 50_000,
            play_ms: 2_500,
            back_ms: 0,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            auto_play: true,
        }
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/trackdeck/config.toml on Linux)
    /// 3. User config file (~/.config/trackdeck/config.toml on Linux)
    /// 4. Environment variables (TRACKDECK_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config.merge_from_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config.merge_from_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load defaults, one explicit file and the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.merge_from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to user config file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()
            .ok_or_else(|| PlayerError::Config("Cannot determine user config path".to_string()))?;
        self.save_to(&path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).config_err("Failed to create config directory")?;
        }

        let toml = toml::to_string_pretty(self).config_err("Failed to serialize config")?;
        std::fs::write(path, toml).config_err("Failed to write config file")?;

        Ok(())
    }

    /// Merge a TOML file over the current values, key by key
    pub fn merge_from_file(&mut self, path: &Path) -> Result<()> {
        let contents = std::fs::read_to_string(path).config_err("Failed to read config file")?;
        let overlay: toml::Value = toml::from_str(&contents).config_err("Failed to parse config file")?;

        let mut base = toml::Value::try_from(&*self).config_err("Failed to serialize config")?;
        merge_values(&mut base, overlay);

        *self = base.try_into().config_err("Invalid config file")?;
        Ok(())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // Example: TRACKDECK_CROSSFADE_MS=4000
        if let Some(value) = env_parse::<u64>("TRACKDECK_CROSSFADE_MS")? {
            self.player.crossfade_duration_ms = value;
        }

        if let Some(value) = env_parse::<u64>("TRACKDECK_CROSSFADE_INTERVAL_MS")? {
            self.player.crossfade_interval_ms = value;
        }

        if let Some(value) = env_parse::<f32>("TRACKDECK_VOLUME")? {
            self.player.default_volume = value;
        }

        if let Some(value) = env_parse::<bool>("TRACKDECK_HANDLE_AUDIO_FOCUS")? {
            self.player.handle_audio_focus = value;
        }

        if let Ok(log_level) = std::env::var("TRACKDECK_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let player = &self.player;
        let buffer = &player.buffer;

        if buffer.min_ms > buffer.max_ms {
            return Err(PlayerError::Config("buffer.min_ms must not exceed buffer.max_ms".to_string()));
        }
        if buffer.play_ms > buffer.min_ms {
            return Err(PlayerError::Config("buffer.play_ms must not exceed buffer.min_ms".to_string()));
        }

        if player.crossfade_interval_ms == 0 {
            return Err(PlayerError::Config("crossfade_interval_ms must be non-zero".to_string()));
        }
        if player.crossfade_interval_ms > player.crossfade_duration_ms {
            return Err(PlayerError::Config(
                "crossfade_interval_ms must not exceed crossfade_duration_ms".to_string(),
            ));
        }

        for (name, value) in [
            ("default_volume", player.default_volume),
            ("crossfade_target_volume", player.crossfade_target_volume),
            ("duck_volume", player.duck_volume),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(PlayerError::Config(format!("{} must be between 0.0 and 1.0", name)));
            }
        }

        if player.progress_update_interval_ms == Some(0) {
            return Err(PlayerError::Config("progress_update_interval_ms must be non-zero".to_string()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(PlayerError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level,
                valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/trackdeck/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA").ok()
            .map(|p| PathBuf::from(p).join("Trackdeck").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/Trackdeck/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    pub fn user_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return dirs::config_dir()
            .map(|p| p.join("trackdeck").join("config.toml"));

        #[cfg(not(target_os = "linux"))]
        return dirs::config_dir()
            .map(|p| p.join("Trackdeck").join("config.toml"));
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PlayerError::Config(format!("Invalid {}", name))),
        Err(_) => Ok(None),
    }
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

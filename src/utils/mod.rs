//! Utility module for trackdeck
//!
//! Error types, configuration, and the small time conversions shared by
//! the bridge-facing command surface and the demo binary.

pub mod config;
pub mod error;

pub use config::{BufferBounds, Config, GeneralConfig, PlayerOptions};
pub use error::{IntoPlayerError, PlayerError, Result};

use std::time::Duration;

/// Load defaults, the system and user files, then environment overrides
pub fn load_config() -> Result<Config> {
    Config::load()
}

/// Render a duration as a clock, `MM:SS` or `H:MM:SS` past the hour
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match (secs / 3600, secs / 60 % 60, secs % 60) {
        (0, m, s) => format!("{:02}:{:02}", m, s),
        (h, m, s) => format!("{}:{:02}:{:02}", h, m, s),
    }
}

/// Fractional seconds from a bridge, negatives and NaN clamped to zero and
/// anything past the representable range saturated
pub fn duration_from_secs_f64(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "00:00");
        assert_eq!(format_duration(Duration::from_millis(61_900)), "01:01");
        assert_eq!(format_duration(Duration::from_secs(3599)), "59:59");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1:00:00");
        assert_eq!(format_duration(Duration::from_secs(37_325)), "10:22:05");
    }

    #[test]
    fn test_duration_from_secs_f64() {
        assert_eq!(duration_from_secs_f64(1.5), Duration::from_millis(1500));
        assert_eq!(duration_from_secs_f64(-3.0), Duration::ZERO);
        assert_eq!(duration_from_secs_f64(f64::NAN), Duration::ZERO);
        assert_eq!(duration_from_secs_f64(f64::INFINITY), Duration::MAX);
        assert_eq!(duration_from_secs_f64(1e20), Duration::MAX);
        assert_eq!(duration_from_secs_f64(f64::MAX), Duration::MAX);
    }
}

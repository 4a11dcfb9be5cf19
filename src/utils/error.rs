//! Error types for trackdeck
//!
//! This module defines the error taxonomy shared by the queue, the engines
//! and the command surface. We use thiserror for the error enum and anyhow
//! only at the application level.

use thiserror::Error;

/// Main error type for trackdeck
#[derive(Error, Debug)]
pub enum PlayerError {
    /// A queue index failed validation
    #[error("Index {index} out of range for queue of {len} items")]
    IndexOutOfRange { index: i64, len: usize },

    /// Malformed source locator or metadata
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    /// The source could not be resolved or opened
    #[error("Source unavailable: {locator}: {reason}")]
    SourceUnavailable { locator: String, reason: String },

    /// Another crossfade swap is still running
    #[error("A crossfade swap is already in progress")]
    SwapInProgress,

    /// The host platform refused audio focus
    #[error("Audio focus denied")]
    FocusDenied,

    /// An operation needed a current item and there is none
    #[error("No current item")]
    NoCurrentItem,

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File error: {0}")]
    FileIO(#[from] std::io::Error),

    /// Broken internal invariant
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlayerError {
    /// Create an index error from a raw (possibly negative) bridge index
    pub fn out_of_range(index: impl Into<i64>, len: usize) -> Self {
        PlayerError::IndexOutOfRange { index: index.into(), len }
    }

    /// Create a source error for a locator
    pub fn source_unavailable<L: Into<String>, R: Into<String>>(locator: L, reason: R) -> Self {
        PlayerError::SourceUnavailable {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    /// Stable code reported to bridge consumers
    pub fn code(&self) -> &'static str {
        match self {
            PlayerError::IndexOutOfRange { .. } => "index_out_of_bounds",
            PlayerError::InvalidItem(_) => "invalid_item",
            PlayerError::SourceUnavailable { .. } => "source_unavailable",
            PlayerError::SwapInProgress => "swap_in_progress",
            PlayerError::FocusDenied => "focus_denied",
            PlayerError::NoCurrentItem => "no_current_item",
            PlayerError::InvalidInput(_) => "invalid_input",
            PlayerError::Config(_) => "config",
            PlayerError::FileIO(_) => "file_io",
            PlayerError::Internal(_) => "internal",
        }
    }

    /// Whether the caller may retry the same command later
    pub fn is_transient(&self) -> bool {
        matches!(self, PlayerError::SwapInProgress | PlayerError::FocusDenied)
    }
}

/// Convenience type alias for Results in trackdeck
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Extension trait for converting other errors to PlayerError
pub trait IntoPlayerError<T> {
    /// Convert this error into a configuration error with the given context
    fn config_err(self, context: &str) -> Result<T>;
    /// Convert this error into a source error for `locator`
    fn source_err(self, locator: &str) -> Result<T>;
    fn invalid_item(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoPlayerError<T> for std::result::Result<T, E> {
    fn config_err(self, context: &str) -> Result<T> {
        self.map_err(|e| PlayerError::Config(format!("{}: {}", context, e)))
    }

    fn source_err(self, locator: &str) -> Result<T> {
        self.map_err(|e| PlayerError::source_unavailable(locator, e.to_string()))
    }

    fn invalid_item(self, context: &str) -> Result<T> {
        self.map_err(|e| PlayerError::InvalidItem(format!("{}: {}", context, e)))
    }
}

/// Helper macro for creating internal errors with file and line information
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::utils::error::PlayerError::Internal(
            format!("{} at {}:{}", $msg, file!(), line!())
        )
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::utils::error::PlayerError::Internal(
            format!("{} at {}:{}", format!($fmt, $($arg)*), file!(), line!())
        )
    };
}

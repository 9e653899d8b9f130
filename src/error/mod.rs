//! Error handling module for holdrec

use thiserror::Error;

use crate::domain::errors::DomainError;

/// Main error type for holdrec operations
#[derive(Error, Debug)]
pub enum HoldrecError {
    /// Configuration file or value rejected
    #[error("Invalid configuration: {message}")]
    ConfigError { message: String },

    /// Media backend initialization error
    #[error("Failed to initialize media backend: {message}")]
    BackendInitError { message: String },

    /// Requested backend is not compiled in
    #[error("Backend '{name}' is not available in this build")]
    BackendUnavailable { name: String },

    /// Worker thread could not be spawned or joined
    #[error("Worker thread error: {message}")]
    WorkerError { message: String },

    /// Recording pipeline error
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parse error
    #[error("Config parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// FFmpeg error
    #[cfg(feature = "libav")]
    #[error("FFmpeg error: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),
}

/// Result type alias for holdrec operations
pub type HoldrecResult<T> = std::result::Result<T, HoldrecError>;

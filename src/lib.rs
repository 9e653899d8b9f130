//! holdrec library
//!
//! Hold-to-record segmented video capture. While a control is held the
//! encoder's output is written into a segment file; releasing pauses. Once the
//! accumulated duration reaches the cap the segments are concatenated into a
//! single video with continuous timestamps.

pub mod adapters;
pub mod cli;
pub mod config;
pub mod config_initialization;
pub mod domain;
pub mod engine;
pub mod error;
pub mod output;
pub mod ports;
pub mod utils;

// Re-export commonly used types
pub use config::{RecorderSettings, VideoSettings};
pub use domain::errors::DomainError;
pub use domain::model::{Orientation, Phase, ProgressSnapshot, StitchReport, TrackFormat};
pub use engine::{Recorder, RecorderDeps, RecorderEvent, SessionControl, ShutdownReport, Stitcher};
pub use error::{HoldrecError, HoldrecResult};

/// Initialize the media backends compiled into this build
pub fn init() -> HoldrecResult<()> {
    #[cfg(feature = "libav")]
    ffmpeg_next::init().map_err(|e| HoldrecError::BackendInitError {
        message: e.to_string(),
    })?;

    Ok(())
}

//! Recorder settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;
use crate::domain::model::{Orientation, TrackFormat, VideoCodec};
use crate::error::{HoldrecError, HoldrecResult};
use crate::utils::logging::LoggingConfig;
use crate::utils::time::ms_to_us;

/// Everything the recorder needs to run one session loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Maximum cumulative recorded duration per session
    pub cap_ms: u64,
    /// Directory for segment files and merged outputs
    pub media_dir: PathBuf,
    /// Encoder poll timeout while idle or recording
    pub idle_poll_ms: u64,
    /// Encoder poll timeout while waiting for the last unit of a segment
    pub finishing_poll_ms: u64,
    /// Progress reporter cadence
    pub progress_interval_ms: u64,
    /// Rotation hint applied to new segments
    pub segment_orientation: Orientation,
    /// Rotation hint applied to the merged output
    pub output_orientation: Orientation,
    pub video: VideoSettings,
    pub logging: LoggingConfig,
}

/// Encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u64,
    /// Frames between key frames; 1 makes every frame a valid cut point
    pub keyframe_interval: u32,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            cap_ms: 6_000,
            media_dir: PathBuf::from("media"),
            idle_poll_ms: 10,
            finishing_poll_ms: 500,
            progress_interval_ms: 16,
            segment_orientation: Orientation::UPRIGHT,
            output_orientation: Orientation::PORTRAIT,
            video: VideoSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            width: 1280,
            height: 720,
            fps: 60,
            bitrate: 16_000_000,
            keyframe_interval: 1,
        }
    }
}

impl RecorderSettings {
    /// Parse settings from TOML; missing keys fall back to defaults
    pub fn from_toml_str(content: &str) -> HoldrecResult<Self> {
        let settings: Self = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> HoldrecResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HoldrecError::ConfigError {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.cap_ms == 0 {
            return Err(DomainError::BadArgs("cap_ms must be greater than zero".to_string()));
        }
        if self.idle_poll_ms == 0 || self.finishing_poll_ms == 0 {
            return Err(DomainError::BadArgs("Poll timeouts must be greater than zero".to_string()));
        }
        if self.finishing_poll_ms < self.idle_poll_ms {
            return Err(DomainError::BadArgs(
                "finishing_poll_ms must not be shorter than idle_poll_ms".to_string(),
            ));
        }
        if self.progress_interval_ms == 0 {
            return Err(DomainError::BadArgs("progress_interval_ms must be greater than zero".to_string()));
        }
        if self.video.keyframe_interval == 0 {
            return Err(DomainError::BadArgs("keyframe_interval must be at least 1".to_string()));
        }
        self.video.track_format().map(|_| ())
    }

    pub fn cap_us(&self) -> u64 {
        ms_to_us(self.cap_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn finishing_poll(&self) -> Duration {
        Duration::from_millis(self.finishing_poll_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// Serialize back to TOML
    pub fn to_toml_string(&self) -> HoldrecResult<String> {
        toml::to_string_pretty(self).map_err(|e| HoldrecError::ConfigError {
            message: format!("Failed to serialize settings: {}", e),
        })
    }
}

impl VideoSettings {
    /// Nominal track format the encoder is configured for
    pub fn track_format(&self) -> Result<TrackFormat, DomainError> {
        Ok(TrackFormat::video(self.codec, self.width, self.height, self.fps)?.with_bit_rate(self.bitrate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = RecorderSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.cap_us(), 6_000_000);
        assert_eq!(settings.finishing_poll(), Duration::from_millis(500));
        assert_eq!(settings.output_orientation.degrees(), 90);
    }

    #[test]
    fn test_partial_toml() {
        let settings = RecorderSettings::from_toml_str(
            r#"
            cap_ms = 3000
            segment_orientation = 270

            [video]
            fps = 30
            "#,
        )
        .unwrap();
        assert_eq!(settings.cap_ms, 3000);
        assert_eq!(settings.segment_orientation.degrees(), 270);
        assert_eq!(settings.video.fps, 30);
        assert_eq!(settings.video.width, 1280);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(RecorderSettings::from_toml_str("cap_ms = 0").is_err());
        assert!(RecorderSettings::from_toml_str("segment_orientation = 45").is_err());
        assert!(RecorderSettings::from_toml_str("idle_poll_ms = 600").is_err());
        assert!(RecorderSettings::from_toml_str("[video]\nfps = 0").is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let settings = RecorderSettings::default();
        let text = settings.to_toml_string().unwrap();
        let parsed = RecorderSettings::from_toml_str(&text).unwrap();
        assert_eq!(parsed.cap_ms, settings.cap_ms);
        assert_eq!(parsed.video.bitrate, settings.video.bitrate);
    }
}

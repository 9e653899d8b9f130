//! Configuration initialization and hierarchy management

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::RecorderSettings;
use crate::domain::errors::DomainError;
use crate::domain::model::Orientation;
use crate::error::{HoldrecError, HoldrecResult};
use crate::utils::logging::{LogFormat, LogLevel};

/// Config files probed when none is given explicitly
pub const CONFIG_SEARCH_PATHS: [&str; 2] = ["holdrec.toml", "config/holdrec.toml"];

/// Values supplied on the command line; `None` keeps the lower layer's value
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub cap_ms: Option<u64>,
    pub media_dir: Option<PathBuf>,
    pub fps: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub segment_orientation: Option<Orientation>,
    pub log_level: Option<LogLevel>,
    pub log_format: Option<LogFormat>,
}

/// Initialize configuration hierarchy following precedence: CLI > Env > File > Defaults
pub fn initialize_configuration_hierarchy(
    explicit_config: Option<&Path>,
    overrides: &SettingsOverrides,
) -> HoldrecResult<RecorderSettings> {
    let mut settings = match locate_config_file(explicit_config)? {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            RecorderSettings::from_file(&path)?
        }
        None => {
            debug!("No configuration file found, using defaults");
            RecorderSettings::default()
        }
    };

    apply_environment(&mut settings, |key| std::env::var(key).ok())?;
    apply_cli_overrides(&mut settings, overrides);
    settings.validate()?;
    Ok(settings)
}

/// Resolve which config file to read, if any
fn locate_config_file(explicit: Option<&Path>) -> HoldrecResult<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(HoldrecError::ConfigError {
                message: format!("Config file does not exist: {}", path.display()),
            });
        }
        return Ok(Some(path.to_path_buf()));
    }

    Ok(CONFIG_SEARCH_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.exists()))
}

/// Apply `HOLDREC_*` environment overrides using `lookup`
pub fn apply_environment<F>(settings: &mut RecorderSettings, lookup: F) -> Result<(), DomainError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut env_overrides = 0;

    if let Some(value) = lookup("HOLDREC_CAP_MS") {
        settings.cap_ms = parse_number("HOLDREC_CAP_MS", &value)?;
        env_overrides += 1;
    }
    if let Some(value) = lookup("HOLDREC_MEDIA_DIR") {
        settings.media_dir = PathBuf::from(value);
        env_overrides += 1;
    }
    if let Some(value) = lookup("HOLDREC_IDLE_POLL_MS") {
        settings.idle_poll_ms = parse_number("HOLDREC_IDLE_POLL_MS", &value)?;
        env_overrides += 1;
    }
    if let Some(value) = lookup("HOLDREC_FINISHING_POLL_MS") {
        settings.finishing_poll_ms = parse_number("HOLDREC_FINISHING_POLL_MS", &value)?;
        env_overrides += 1;
    }
    if let Some(value) = lookup("HOLDREC_FPS") {
        settings.video.fps = parse_number("HOLDREC_FPS", &value)?;
        env_overrides += 1;
    }
    if let Some(value) = lookup("HOLDREC_BITRATE") {
        settings.video.bitrate = parse_number("HOLDREC_BITRATE", &value)?;
        env_overrides += 1;
    }
    if let Some(value) = lookup("HOLDREC_LOG_LEVEL") {
        settings.logging.level = LogLevel::parse(&value)?;
        env_overrides += 1;
    }

    if env_overrides > 0 {
        info!("Applied {} environment variable overrides", env_overrides);
    }
    Ok(())
}

/// Apply command-line overrides
pub fn apply_cli_overrides(settings: &mut RecorderSettings, overrides: &SettingsOverrides) {
    if let Some(cap_ms) = overrides.cap_ms {
        settings.cap_ms = cap_ms;
    }
    if let Some(dir) = &overrides.media_dir {
        settings.media_dir = dir.clone();
    }
    if let Some(fps) = overrides.fps {
        settings.video.fps = fps;
    }
    if let Some(width) = overrides.width {
        settings.video.width = width;
    }
    if let Some(height) = overrides.height {
        settings.video.height = height;
    }
    if let Some(orientation) = overrides.segment_orientation {
        settings.segment_orientation = orientation;
    }
    if let Some(level) = overrides.log_level {
        settings.logging.level = level;
    }
    if let Some(format) = overrides.log_format {
        settings.logging.format = format;
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, DomainError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| DomainError::BadArgs(format!("Invalid value for {}: {} ({})", key, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> =
            [("HOLDREC_CAP_MS", "4000"), ("HOLDREC_FPS", "25"), ("HOLDREC_LOG_LEVEL", "debug")].into();
        let mut settings = RecorderSettings::default();
        apply_environment(&mut settings, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.cap_ms, 4000);
        assert_eq!(settings.video.fps, 25);
        assert_eq!(settings.logging.level, LogLevel::Debug);
    }

    #[test]
    fn test_environment_rejects_garbage() {
        let mut settings = RecorderSettings::default();
        let result = apply_environment(&mut settings, |k| (k == "HOLDREC_CAP_MS").then(|| "six".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_beats_environment() {
        let mut settings = RecorderSettings::default();
        apply_environment(&mut settings, |k| (k == "HOLDREC_CAP_MS").then(|| "4000".to_string())).unwrap();
        let overrides = SettingsOverrides { cap_ms: Some(2000), ..Default::default() };
        apply_cli_overrides(&mut settings, &overrides);
        assert_eq!(settings.cap_ms, 2000);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let result = initialize_configuration_hierarchy(
            Some(Path::new("/definitely/not/here/holdrec.toml")),
            &SettingsOverrides::default(),
        );
        assert!(matches!(result, Err(HoldrecError::ConfigError { .. })));
    }

    #[test]
    fn test_explicit_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("holdrec.toml");
        std::fs::write(&path, "cap_ms = 2500\n").unwrap();
        let settings = initialize_configuration_hierarchy(Some(&path), &SettingsOverrides::default()).unwrap();
        assert_eq!(settings.cap_ms, 2500);
    }
}

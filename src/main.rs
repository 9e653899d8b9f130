//! holdrec - hold-to-record segmented video capture
//!
//! # Usage
//!
//! ```bash
//! holdrec record --cap-ms 6000
//! holdrec record --backend trace --script "hold:2500,wait:500,hold:4000"
//! holdrec stitch seg-a.mp4 seg-b.mp4 --out-dir videos
//! holdrec library --format json
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};

use holdrec::cli::{commands, Cli, Commands};
use holdrec::config_initialization::{initialize_configuration_hierarchy, SettingsOverrides};
use holdrec::domain::model::Orientation;
use holdrec::utils::logging::{LogFormat, LogLevel, LoggingSystem};

/// Main entry point for the holdrec CLI application
fn main() -> Result<()> {
    let cli = Cli::parse();

    let overrides = build_overrides(&cli)?;
    let settings = initialize_configuration_hierarchy(cli.config.as_deref(), &overrides)?;

    let logging = LoggingSystem::new(settings.logging.clone());
    logging.initialize();
    logging.log_system_info();
    debug!(?settings, "Effective configuration");

    holdrec::init()?;

    match cli.command {
        Commands::Record(args) => {
            info!("Executing record command");
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(commands::record(args, settings))?;
        }
        Commands::Stitch(args) => {
            info!("Executing stitch command");
            commands::stitch(args, settings)?;
        }
        Commands::Library(args) => {
            commands::library(args, settings)?;
        }
    }

    info!("holdrec completed successfully");
    Ok(())
}

/// Collect the command-line layer of the configuration hierarchy
fn build_overrides(cli: &Cli) -> Result<SettingsOverrides> {
    let mut overrides = SettingsOverrides {
        log_level: cli.log_level.as_deref().map(LogLevel::parse).transpose()?,
        log_format: cli.log_format.as_deref().map(LogFormat::parse).transpose()?,
        ..SettingsOverrides::default()
    };

    match &cli.command {
        Commands::Record(args) => {
            overrides.cap_ms = args.cap_ms;
            overrides.media_dir = args.media_dir.clone();
            overrides.fps = args.fps;
            overrides.width = args.width;
            overrides.height = args.height;
            overrides.segment_orientation = args.orientation.map(Orientation::from_degrees).transpose()?;
        }
        Commands::Stitch(_) => {}
        Commands::Library(args) => {
            overrides.media_dir = args.media_dir.clone();
        }
    }
    Ok(overrides)
}

//! CLI module for holdrec
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod args;
pub mod commands;
pub mod script;

pub use args::{Backend, LibraryArgs, ListFormat, RecordArgs, StitchArgs};

/// holdrec - hold-to-record segmented video capture
///
/// Press and hold to record, release to pause. Segments accumulate until the
/// duration cap is reached, then they are stitched into a single video.
#[derive(Parser, Debug)]
#[command(name = "holdrec")]
#[command(about = "Hold-to-record segmented video capture with a duration cap")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "HOLDREC_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format (pretty, compact, json)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Configuration file (defaults to holdrec.toml or config/holdrec.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a session interactively or from a script
    Record(args::RecordArgs),
    /// Stitch existing segment files into one video
    Stitch(args::StitchArgs),
    /// List recorded videos and leftover segments
    Library(args::LibraryArgs),
}

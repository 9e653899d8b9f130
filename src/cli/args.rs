//! Command-line argument definitions

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use clap_num::number_range;

/// Container and encoder backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// H.264 encoder and MP4 files through libav
    Libav,
    /// Synthetic encoder and line-delimited JSON trace files
    Trace,
}

impl Backend {
    pub fn default_backend() -> Self {
        if cfg!(feature = "libav") {
            Backend::Libav
        } else {
            Backend::Trace
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Backend::Libav => "libav",
            Backend::Trace => "trace",
        }
    }
}

/// Listing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    Text,
    Json,
    Yaml,
}

fn cap_range(s: &str) -> Result<u64, String> {
    number_range(s, 100, 600_000)
}

fn fps_range(s: &str) -> Result<u32, String> {
    number_range(s, 1, 240)
}

fn dimension_range(s: &str) -> Result<u32, String> {
    number_range(s, 16, 7680)
}

/// Arguments for the record command
#[derive(Args, Debug)]
pub struct RecordArgs {
    /// Encoder and container backend
    #[arg(long, value_enum, default_value_t = Backend::default_backend())]
    pub backend: Backend,

    /// Maximum recorded duration per session in milliseconds
    #[arg(long, value_parser = cap_range)]
    pub cap_ms: Option<u64>,

    /// Directory for segments and stitched videos
    #[arg(long)]
    pub media_dir: Option<PathBuf>,

    /// Frames per second
    #[arg(long, value_parser = fps_range)]
    pub fps: Option<u32>,

    /// Frame width
    #[arg(long, value_parser = dimension_range)]
    pub width: Option<u32>,

    /// Frame height
    #[arg(long, value_parser = dimension_range)]
    pub height: Option<u32>,

    /// Rotation hint for new segments in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub orientation: Option<i32>,

    /// Scripted presses instead of stdin, e.g. "hold:2500,wait:500,hold:4000"
    #[arg(long)]
    pub script: Option<String>,

    /// Keep segments that were never stitched when exiting
    #[arg(long)]
    pub keep_segments: bool,

    /// Print progress and events as JSON lines
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the stitch command
#[derive(Args, Debug)]
pub struct StitchArgs {
    /// Segment files, in recording order
    #[arg(required = true, num_args = 1..)]
    pub segments: Vec<PathBuf>,

    /// Container backend the segments were written with
    #[arg(long, value_enum, default_value_t = Backend::default_backend())]
    pub backend: Backend,

    /// Directory for the stitched video (defaults to the media directory)
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Rotation hint for the stitched video in degrees
    #[arg(long, allow_hyphen_values = true)]
    pub orientation: Option<i32>,

    /// Do not delete the segment files afterwards
    #[arg(long)]
    pub keep_segments: bool,

    /// Print the stitch report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the library command
#[derive(Args, Debug)]
pub struct LibraryArgs {
    /// Directory to list (defaults to the configured media directory)
    #[arg(long)]
    pub media_dir: Option<PathBuf>,

    /// Backend whose file extension to look for
    #[arg(long, value_enum, default_value_t = Backend::default_backend())]
    pub backend: Backend,

    /// Delete leftover segment files
    #[arg(long)]
    pub purge: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = ListFormat::Text)]
    pub format: ListFormat,
}

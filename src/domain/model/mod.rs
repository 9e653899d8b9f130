// Domain models - Core types and data structures

use std::fmt;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use crate::domain::errors::DomainError;

/// Microseconds per second, the unit of every timestamp in the pipeline
pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Recording phase of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Phase {
    /// Ready for a new segment
    Idle = 0,
    /// A segment is being captured
    Recording = 1,
    /// Release requested; waiting for the last encoded unit
    Finishing = 2,
    /// Cap reached; segments are being merged
    Stitching = 3,
}

impl Phase {
    /// All phases, in declaration order
    pub const ALL: [Phase; 4] = [Phase::Idle, Phase::Recording, Phase::Finishing, Phase::Stitching];

    /// Decode the raw representation used by the atomic phase cell
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(Phase::Idle),
            1 => Some(Phase::Recording),
            2 => Some(Phase::Finishing),
            3 => Some(Phase::Stitching),
            _ => None,
        }
    }

    /// Encoder output is routed to the active segment in these phases
    pub fn is_capturing(self) -> bool {
        matches!(self, Phase::Recording | Phase::Finishing)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Recording => "recording",
            Phase::Finishing => "finishing",
            Phase::Stitching => "stitching",
        };
        f.write_str(name)
    }
}

/// Inputs that move the phase machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// User pressed the record control
    StartSegment,
    /// User released the record control
    StopSegment,
    /// Cumulative duration hit the cap while still recording
    CapReached,
    /// Drain loop finalized the active segment
    SegmentFinalized { cap_reached: bool },
    /// Segment writer could not be opened
    SegmentAborted,
    /// Stitcher finished, successfully or not
    StitchCompleted,
}

impl fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseEvent::StartSegment => f.write_str("start-segment"),
            PhaseEvent::StopSegment => f.write_str("stop-segment"),
            PhaseEvent::CapReached => f.write_str("cap-reached"),
            PhaseEvent::SegmentFinalized { cap_reached } => {
                write!(f, "segment-finalized(cap_reached={})", cap_reached)
            }
            PhaseEvent::SegmentAborted => f.write_str("segment-aborted"),
            PhaseEvent::StitchCompleted => f.write_str("stitch-completed"),
        }
    }
}

/// Rotation hint stored in the container, in clockwise degrees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Orientation(u16);

impl Orientation {
    pub const UPRIGHT: Orientation = Orientation(0);
    pub const PORTRAIT: Orientation = Orientation(90);

    /// Create from degrees; only quarter turns are representable
    pub fn from_degrees(degrees: i32) -> Result<Self, DomainError> {
        if degrees % 90 != 0 {
            return Err(DomainError::BadArgs(format!(
                "Orientation must be a multiple of 90 degrees, got {}",
                degrees
            )));
        }
        Ok(Self(degrees.rem_euclid(360) as u16))
    }

    pub fn degrees(self) -> u16 {
        self.0
    }
}

impl TryFrom<u32> for Orientation {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let degrees = i32::try_from(value)
            .map_err(|_| DomainError::BadArgs(format!("Orientation out of range: {}", value)))?;
        Self::from_degrees(degrees)
    }
}

impl From<Orientation> for u32 {
    fn from(value: Orientation) -> Self {
        value.0 as u32
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.0)
    }
}

/// Video codec carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
    Vp9,
    Av1,
    /// Synthetic payloads produced by the trace backend
    Raw,
}

impl VideoCodec {
    /// MIME type of the elementary stream
    pub fn mime(self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/avc",
            VideoCodec::Hevc => "video/hevc",
            VideoCodec::Vp9 => "video/x-vnd.on2.vp9",
            VideoCodec::Av1 => "video/av01",
            VideoCodec::Raw => "video/raw",
        }
    }

    /// Parse a codec from its MIME type or short name
    pub fn parse(name: &str) -> Result<Self, DomainError> {
        match name.trim().to_lowercase().as_str() {
            "h264" | "avc" | "video/avc" => Ok(VideoCodec::H264),
            "hevc" | "h265" | "video/hevc" => Ok(VideoCodec::Hevc),
            "vp9" | "video/x-vnd.on2.vp9" => Ok(VideoCodec::Vp9),
            "av1" | "video/av01" => Ok(VideoCodec::Av1),
            "raw" | "video/raw" => Ok(VideoCodec::Raw),
            other => Err(DomainError::BadArgs(format!("Unsupported codec: {}", other))),
        }
    }
}

/// Description of a single video track, as reported by the encoder or a reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackFormat {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub bit_rate: u64,
    /// Codec configuration record (SPS/PPS for H.264), empty if in-band
    #[serde(default)]
    pub codec_config: Vec<u8>,
    /// Track duration; only known for finished containers
    #[serde(default)]
    pub duration_us: Option<i64>,
}

impl TrackFormat {
    /// Create a new video track format
    pub fn video(codec: VideoCodec, width: u32, height: u32, frame_rate: u32) -> Result<Self, DomainError> {
        if width == 0 || height == 0 {
            return Err(DomainError::BadArgs("Frame size must be non-zero".to_string()));
        }
        if frame_rate == 0 {
            return Err(DomainError::BadArgs("Frame rate must be non-zero".to_string()));
        }
        Ok(Self {
            codec,
            width,
            height,
            frame_rate,
            bit_rate: 0,
            codec_config: Vec::new(),
            duration_us: None,
        })
    }

    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn with_codec_config(mut self, config: Vec<u8>) -> Self {
        self.codec_config = config;
        self
    }

    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    pub fn mime(&self) -> &'static str {
        self.codec.mime()
    }

    /// Nominal duration of one frame
    pub fn frame_interval_us(&self) -> i64 {
        MICROS_PER_SECOND / self.frame_rate.max(1) as i64
    }
}

/// Access unit / sample flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const NONE: SampleFlags = SampleFlags(0);
    pub const KEY_FRAME: SampleFlags = SampleFlags(1);
    pub const CODEC_CONFIG: SampleFlags = SampleFlags(2);
    pub const END_OF_STREAM: SampleFlags = SampleFlags(4);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits & 0b111)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_key_frame(self) -> bool {
        self.contains(Self::KEY_FRAME)
    }

    pub fn is_codec_config(self) -> bool {
        self.contains(Self::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(self) -> bool {
        self.contains(Self::END_OF_STREAM)
    }
}

impl std::ops::BitOr for SampleFlags {
    type Output = SampleFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        SampleFlags(self.0 | rhs.0)
    }
}

/// Identifies an encoder output buffer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputSlot(pub usize);

/// One compressed frame handed out by the encoder.
///
/// The payload belongs to the encoder's buffer pool until the unit is given
/// back through `VideoEncoder::release_output`.
#[derive(Debug)]
pub struct AccessUnit {
    pub slot: OutputSlot,
    pub payload: Vec<u8>,
    pub pts_us: i64,
    pub flags: SampleFlags,
}

impl AccessUnit {
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Units that carry picture data for the container
    pub fn is_media(&self) -> bool {
        !self.payload.is_empty() && !self.flags.is_codec_config()
    }
}

/// Metadata of a sample read back from a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleMeta {
    pub size: usize,
    pub timestamp_us: i64,
    pub flags: SampleFlags,
}

/// Point-in-time view of the session for progress display
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub recorded_us: u64,
    pub cap_us: u64,
}

impl ProgressSnapshot {
    /// Fraction of the cap recorded so far, clamped to 0.0..=1.0
    pub fn fraction(&self) -> f32 {
        if self.cap_us == 0 {
            return 1.0;
        }
        (self.recorded_us as f64 / self.cap_us as f64).clamp(0.0, 1.0) as f32
    }
}

/// Result of finalizing one segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub path: PathBuf,
    pub length_us: i64,
    pub samples: u64,
}

/// Result of a successful stitch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StitchReport {
    pub output: PathBuf,
    pub segments: usize,
    pub samples: u64,
    pub duration_us: i64,
    /// Offsets at which segments 2..n start in the merged timeline
    pub boundaries_us: Vec<i64>,
}

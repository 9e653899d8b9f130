//! MP4 container writer and reader using libav bindings

use std::path::{Path, PathBuf};

use ffmpeg_next as ffmpeg;
use ffmpeg::codec::{self, Id};
use ffmpeg::format;
use ffmpeg::media;
use ffmpeg::{Dictionary, Packet, Rational, Rescale};
use tracing::{debug, trace};

use crate::domain::errors::DomainError;
use crate::domain::model::{Orientation, SampleFlags, SampleMeta, TrackFormat, VideoCodec};
use crate::ports::{ContainerReader, ContainerWriter, MediaStore};

pub const MP4_EXTENSION: &str = "mp4";
pub const MP4_MIME: &str = "video/mp4";

/// All timestamps crossing the port are in microseconds
const MICROS: Rational = Rational(1, 1_000_000);

pub(crate) fn codec_id(codec: VideoCodec) -> Id {
    match codec {
        VideoCodec::H264 => Id::H264,
        VideoCodec::Hevc => Id::HEVC,
        VideoCodec::Vp9 => Id::VP9,
        VideoCodec::Av1 => Id::AV1,
        VideoCodec::Raw => Id::RAWVIDEO,
    }
}

fn video_codec(id: Id) -> Result<VideoCodec, DomainError> {
    match id {
        Id::H264 => Ok(VideoCodec::H264),
        Id::HEVC => Ok(VideoCodec::Hevc),
        Id::VP9 => Ok(VideoCodec::Vp9),
        Id::AV1 => Ok(VideoCodec::Av1),
        Id::RAWVIDEO => Ok(VideoCodec::Raw),
        other => Err(DomainError::DemuxFail(format!("Unsupported video codec {:?}", other))),
    }
}

/// Factory for MP4 writers and readers
#[derive(Debug, Clone, Copy)]
pub struct LibavMediaStore;

impl LibavMediaStore {
    pub fn new() -> Result<Self, DomainError> {
        ffmpeg::init().map_err(|e| DomainError::InternalError(format!("FFmpeg initialization failed: {}", e)))?;
        Ok(Self)
    }
}

impl MediaStore for LibavMediaStore {
    fn create_writer(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, DomainError> {
        Ok(Box::new(LibavWriter::create(path)?))
    }

    fn open_reader(&self, path: &Path) -> Result<Box<dyn ContainerReader>, DomainError> {
        Ok(Box::new(LibavReader::open(path)?))
    }

    fn extension(&self) -> &'static str {
        MP4_EXTENSION
    }

    fn mime_type(&self) -> &'static str {
        MP4_MIME
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Configuring,
    Started,
    Stopped,
}

/// Muxes one video track into an MP4 file
pub struct LibavWriter {
    path: PathBuf,
    octx: Option<format::context::Output>,
    state: WriterState,
    track: Option<usize>,
    orientation: Orientation,
    time_base: Rational,
    /// Frame interval of the track, in microseconds until `start` and in the stream time base after
    frame_duration: i64,
    last_dts: Option<i64>,
}

impl LibavWriter {
    pub fn create(path: &Path) -> Result<Self, DomainError> {
        let octx = format::output(&path)
            .map_err(|e| DomainError::FsFail(format!("Failed to create output {}: {}", path.display(), e)))?;
        Ok(Self {
            path: path.to_path_buf(),
            octx: Some(octx),
            state: WriterState::Configuring,
            track: None,
            orientation: Orientation::UPRIGHT,
            time_base: MICROS,
            frame_duration: 0,
            last_dts: None,
        })
    }

    fn output(&mut self) -> Result<&mut format::context::Output, DomainError> {
        self.octx
            .as_mut()
            .ok_or_else(|| DomainError::MuxFail("Writer already released".to_string()))
    }
}

impl ContainerWriter for LibavWriter {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, DomainError> {
        if self.state != WriterState::Configuring {
            return Err(DomainError::MuxFail("Tracks must be added before start".to_string()));
        }
        if self.track.is_some() {
            return Err(DomainError::MuxFail("Only one video track is supported".to_string()));
        }

        let id = codec_id(format.codec);
        let octx = self.output()?;
        let mut stream = octx
            .add_stream(codec::encoder::find(id))
            .map_err(|e| DomainError::MuxFail(format!("Failed to add video stream: {}", e)))?;
        stream.set_time_base(MICROS);
        stream.set_rate(Rational(format.frame_rate as i32, 1));
        stream.set_avg_frame_rate(Rational(format.frame_rate as i32, 1));

        unsafe {
            let par = (*stream.as_mut_ptr()).codecpar;
            (*par).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
            (*par).codec_id = id.into();
            (*par).width = format.width as i32;
            (*par).height = format.height as i32;
            (*par).bit_rate = format.bit_rate as i64;
            if !format.codec_config.is_empty() {
                let size = format.codec_config.len();
                let padded = size + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
                let extradata = ffmpeg::ffi::av_mallocz(padded) as *mut u8;
                if extradata.is_null() {
                    return Err(DomainError::ResourceUnavailable("Out of memory for codec config".to_string()));
                }
                std::ptr::copy_nonoverlapping(format.codec_config.as_ptr(), extradata, size);
                (*par).extradata = extradata;
                (*par).extradata_size = size as i32;
            }
        }

        let index = stream.index();
        self.track = Some(index);
        self.frame_duration = format.frame_interval_us();
        debug!(path = %self.path.display(), index, codec = ?format.codec, "Added video track");
        Ok(index)
    }

    fn set_orientation_hint(&mut self, orientation: Orientation) -> Result<(), DomainError> {
        if self.state != WriterState::Configuring {
            return Err(DomainError::MuxFail("Orientation must be set before start".to_string()));
        }
        self.orientation = orientation;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DomainError> {
        if self.state != WriterState::Configuring {
            return Err(DomainError::MuxFail("Writer already started".to_string()));
        }
        let track = self
            .track
            .ok_or_else(|| DomainError::MuxFail("No track added before start".to_string()))?;
        let orientation = self.orientation;
        let octx = self.output()?;

        if orientation != Orientation::UPRIGHT {
            if let Some(mut stream) = octx.stream_mut(track) {
                let mut metadata = Dictionary::new();
                metadata.set("rotate", &orientation.degrees().to_string());
                stream.set_metadata(metadata);
            }
        }

        octx.write_header()
            .map_err(|e| DomainError::MuxFail(format!("Failed to write header: {}", e)))?;
        let time_base = octx.stream(track).map(|s| s.time_base()).unwrap_or(MICROS);
        self.time_base = time_base;
        // The muxer counts the last packet's duration into the track length
        self.frame_duration = self.frame_duration.rescale(MICROS, time_base).max(1);
        self.state = WriterState::Started;
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: usize,
        payload: &[u8],
        timestamp_us: i64,
        flags: SampleFlags,
    ) -> Result<(), DomainError> {
        if self.state != WriterState::Started {
            return Err(DomainError::MuxFail("Writer is not started".to_string()));
        }
        if Some(track) != self.track {
            return Err(DomainError::MuxFail(format!("Unknown track {}", track)));
        }

        let mut ts = timestamp_us.rescale(MICROS, self.time_base);
        if let Some(last) = self.last_dts {
            if ts <= last {
                ts = last + 1;
            }
        }

        let mut packet = Packet::copy(payload);
        packet.set_stream(track);
        packet.set_pts(Some(ts));
        packet.set_dts(Some(ts));
        packet.set_duration(self.frame_duration);
        if flags.is_key_frame() {
            packet.set_flags(codec::packet::Flags::KEY);
        }

        let octx = self.output()?;
        packet
            .write_interleaved(octx)
            .map_err(|e| DomainError::MuxFail(format!("Failed to write packet: {}", e)))?;
        self.last_dts = Some(ts);
        trace!(size = payload.len(), ts, "Muxed packet");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DomainError> {
        match self.state {
            WriterState::Stopped => Ok(()),
            WriterState::Configuring => Err(DomainError::MuxFail("Writer was never started".to_string())),
            WriterState::Started => {
                // Marked stopped first so a failing trailer is not retried
                self.state = WriterState::Stopped;
                self.output()?
                    .write_trailer()
                    .map_err(|e| DomainError::MuxFail(format!("Failed to write trailer: {}", e)))
            }
        }
    }

    fn release(&mut self) {
        if self.octx.take().is_some() {
            debug!(path = %self.path.display(), "Released MP4 writer");
        }
    }
}

/// Demuxes the video track of an MP4 file
pub struct LibavReader {
    path: PathBuf,
    ictx: Option<format::context::Input>,
    /// (stream index, format) of each video stream
    tracks: Vec<(usize, Rational, TrackFormat)>,
    selected: Option<usize>,
}

impl LibavReader {
    pub fn open(path: &Path) -> Result<Self, DomainError> {
        if !path.exists() {
            return Err(DomainError::FileNotFound(path.display().to_string()));
        }
        let ictx = format::input(&path)
            .map_err(|e| DomainError::DemuxFail(format!("Failed to open {}: {}", path.display(), e)))?;

        let container_duration = ictx.duration();
        let mut tracks = Vec::new();
        for stream in ictx.streams() {
            let parameters = stream.parameters();
            if parameters.medium() != media::Type::Video {
                continue;
            }
            let decoder = codec::context::Context::from_parameters(parameters.clone())
                .and_then(|ctx| ctx.decoder().video())
                .map_err(|e| DomainError::DemuxFail(format!("Unreadable video stream: {}", e)))?;

            let rate = stream.avg_frame_rate();
            let fps = if rate.denominator() > 0 && rate.numerator() > 0 {
                (rate.numerator() as f64 / rate.denominator() as f64).round() as u32
            } else {
                30
            };
            let duration_us = if stream.duration() > 0 {
                stream.duration().rescale(stream.time_base(), MICROS)
            } else {
                container_duration.max(0)
            };
            let codec_config = unsafe {
                let par = parameters.as_ptr();
                if (*par).extradata.is_null() || (*par).extradata_size <= 0 {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts((*par).extradata, (*par).extradata_size as usize).to_vec()
                }
            };

            let format = TrackFormat::video(video_codec(parameters.id())?, decoder.width(), decoder.height(), fps.max(1))?
                .with_bit_rate(decoder.bit_rate() as u64)
                .with_codec_config(codec_config)
                .with_duration_us(duration_us);
            tracks.push((stream.index(), stream.time_base(), format));
        }

        debug!(path = %path.display(), video_tracks = tracks.len(), "Opened MP4 for reading");
        Ok(Self {
            path: path.to_path_buf(),
            ictx: Some(ictx),
            tracks,
            selected: None,
        })
    }
}

impl ContainerReader for LibavReader {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat, DomainError> {
        self.tracks
            .get(index)
            .map(|(_, _, format)| format.clone())
            .ok_or_else(|| DomainError::DemuxFail(format!("{} has no track {}", self.path.display(), index)))
    }

    fn select_track(&mut self, index: usize) -> Result<(), DomainError> {
        if index >= self.tracks.len() {
            return Err(DomainError::DemuxFail(format!("{} has no track {}", self.path.display(), index)));
        }
        self.selected = Some(index);
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<SampleMeta>, DomainError> {
        let Some(&(stream_index, time_base, _)) = self.selected.and_then(|i| self.tracks.get(i)) else {
            return Err(DomainError::DemuxFail("No track selected".to_string()));
        };
        let ictx = self
            .ictx
            .as_mut()
            .ok_or_else(|| DomainError::DemuxFail("Reader already released".to_string()))?;

        loop {
            let mut packet = Packet::empty();
            match packet.read(ictx) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(DomainError::DemuxFail(format!("Failed to read packet: {}", e))),
            }
            if packet.stream() != stream_index {
                continue;
            }

            let data = packet.data().unwrap_or(&[]);
            buf.clear();
            buf.extend_from_slice(data);
            let ts = packet.pts().or(packet.dts()).unwrap_or(0).rescale(time_base, MICROS);
            let flags = if packet.is_key() {
                SampleFlags::KEY_FRAME
            } else {
                SampleFlags::NONE
            };
            return Ok(Some(SampleMeta {
                size: data.len(),
                timestamp_us: ts,
                flags,
            }));
        }
    }

    fn release(&mut self) {
        self.ictx = None;
    }
}

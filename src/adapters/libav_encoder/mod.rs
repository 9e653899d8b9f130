//! H.264 encoder fed by a built-in test pattern, using libav bindings
//!
//! The pattern stands in for a camera: frames are generated on the wall
//! clock at the configured rate and pushed through a real encoder, so the
//! drain loop sees the same output-queue behaviour as with live capture.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ffmpeg_next as ffmpeg;
use ffmpeg::codec::{self, Id};
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::{Dictionary, Packet, Rational};
use tracing::{debug, info, trace, warn};

use crate::config::VideoSettings;
use crate::domain::errors::DomainError;
use crate::domain::model::{AccessUnit, OutputSlot, SampleFlags, TrackFormat, VideoCodec};
use crate::ports::{EncoderEvent, VideoEncoder};
use crate::utils::time::duration_to_us;

const OUTPUT_POOL: usize = 8;

fn encoder_err(context: &str) -> impl Fn(ffmpeg::Error) -> DomainError + '_ {
    move |e| DomainError::EncoderFail(format!("{}: {}", context, e))
}

/// Thread count for the software encoder
fn optimize_thread_count() -> usize {
    num_cpus::get().clamp(1, 8)
}

pub struct LibavEncoder {
    encoder: codec::encoder::video::Encoder,
    format: TrackFormat,
    frame: VideoFrame,
    frame_index: i64,
    frame_interval_us: i64,
    epoch: Option<Instant>,
    announced: bool,
    ready: VecDeque<AccessUnit>,
    free_buffers: Vec<Vec<u8>>,
    in_flight: usize,
    next_slot: usize,
}

impl LibavEncoder {
    pub fn new(settings: &VideoSettings) -> Result<Self, DomainError> {
        ffmpeg::init().map_err(encoder_err("FFmpeg initialization failed"))?;
        if settings.codec != VideoCodec::H264 {
            return Err(DomainError::BadArgs(format!(
                "The libav backend encodes H.264 only, not {:?}",
                settings.codec
            )));
        }

        let codec = codec::encoder::find(Id::H264)
            .ok_or_else(|| DomainError::ResourceUnavailable("No H.264 encoder available".to_string()))?;

        let mut video = codec::context::Context::new()
            .encoder()
            .video()
            .map_err(encoder_err("Failed to create video encoder"))?;
        video.set_width(settings.width);
        video.set_height(settings.height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(Rational(1, 1_000_000));
        video.set_frame_rate(Some(Rational(settings.fps as i32, 1)));
        video.set_bit_rate(settings.bitrate as usize);
        video.set_gop(settings.keyframe_interval);
        video.set_max_b_frames(0);
        video.set_flags(codec::Flags::GLOBAL_HEADER);

        let mut options = Dictionary::new();
        options.set("preset", "ultrafast");
        options.set("tune", "zerolatency");
        options.set("threads", &optimize_thread_count().to_string());

        let encoder = video
            .open_as_with(codec, options)
            .map_err(encoder_err("Failed to open video encoder"))?;

        let codec_config = unsafe {
            let ctx = encoder.as_ptr();
            if (*ctx).extradata.is_null() || (*ctx).extradata_size <= 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts((*ctx).extradata, (*ctx).extradata_size as usize).to_vec()
            }
        };

        let format = settings.track_format()?.with_codec_config(codec_config);
        info!(
            width = settings.width,
            height = settings.height,
            fps = settings.fps,
            bitrate = settings.bitrate,
            "H.264 encoder opened"
        );

        Ok(Self {
            encoder,
            frame_interval_us: format.frame_interval_us(),
            frame: VideoFrame::new(Pixel::YUV420P, settings.width, settings.height),
            format,
            frame_index: 0,
            epoch: None,
            announced: false,
            ready: VecDeque::new(),
            free_buffers: Vec::new(),
            in_flight: 0,
            next_slot: 0,
        })
    }

    /// Moving diagonal bands so consecutive frames differ
    fn paint_frame(&mut self) {
        let shift = self.frame_index as usize;
        let width = self.frame.width() as usize;
        let height = self.frame.height() as usize;

        let stride = self.frame.stride(0);
        let luma = self.frame.data_mut(0);
        for y in 0..height {
            let row = &mut luma[y * stride..y * stride + width];
            for (x, px) in row.iter_mut().enumerate() {
                *px = ((x + y + shift * 4) % 256) as u8;
            }
        }
        for plane in 1..3 {
            let stride = self.frame.stride(plane);
            let value = if plane == 1 { (shift % 256) as u8 } else { 128 };
            let data = self.frame.data_mut(plane);
            for y in 0..height / 2 {
                data[y * stride..y * stride + width / 2].fill(value);
            }
        }
    }

    fn encode_next_frame(&mut self) -> Result<(), DomainError> {
        self.paint_frame();
        self.frame.set_pts(Some(self.frame_index * self.frame_interval_us));
        self.encoder
            .send_frame(&self.frame)
            .map_err(encoder_err("Failed to send frame to encoder"))?;
        self.frame_index += 1;
        self.collect_packets();
        Ok(())
    }

    fn collect_packets(&mut self) {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            let data = packet.data().unwrap_or(&[]);
            let mut payload = self.free_buffers.pop().unwrap_or_default();
            payload.clear();
            payload.extend_from_slice(data);

            let flags = if packet.is_key() {
                SampleFlags::KEY_FRAME
            } else {
                SampleFlags::NONE
            };
            let slot = OutputSlot(self.next_slot % OUTPUT_POOL);
            self.next_slot += 1;
            trace!(size = payload.len(), pts = ?packet.pts(), "Encoder produced packet");
            self.ready.push_back(AccessUnit {
                slot,
                payload,
                pts_us: packet.pts().unwrap_or(0),
                flags,
            });
        }
    }

    fn time_until_next_frame(&mut self) -> Duration {
        let epoch = *self.epoch.get_or_insert_with(Instant::now);
        let due_us = self.frame_index * self.frame_interval_us;
        let elapsed_us = duration_to_us(epoch.elapsed()) as i64;
        Duration::from_micros((due_us - elapsed_us).max(0) as u64)
    }
}

impl VideoEncoder for LibavEncoder {
    fn poll(&mut self, timeout: Duration) -> Result<EncoderEvent, DomainError> {
        if !self.announced {
            self.announced = true;
            return Ok(EncoderEvent::FormatChanged(self.format.clone()));
        }

        if self.in_flight < OUTPUT_POOL {
            if let Some(unit) = self.ready.pop_front() {
                self.in_flight += 1;
                return Ok(EncoderEvent::Unit(unit));
            }
        } else {
            std::thread::sleep(timeout);
            return Ok(EncoderEvent::Timeout);
        }

        let wait = self.time_until_next_frame();
        if wait > timeout {
            std::thread::sleep(timeout);
            return Ok(EncoderEvent::Timeout);
        }
        std::thread::sleep(wait);
        self.encode_next_frame()?;

        match self.ready.pop_front() {
            Some(unit) => {
                self.in_flight += 1;
                Ok(EncoderEvent::Unit(unit))
            }
            None => Ok(EncoderEvent::Timeout),
        }
    }

    fn release_output(&mut self, unit: AccessUnit) {
        if self.in_flight == 0 {
            warn!(slot = unit.slot.0, "Released an output buffer that was not handed out");
            return;
        }
        self.in_flight -= 1;
        if self.free_buffers.len() < OUTPUT_POOL {
            self.free_buffers.push(unit.payload);
        }
    }
}

impl Drop for LibavEncoder {
    fn drop(&mut self) {
        if self.encoder.send_eof().is_ok() {
            let mut packet = Packet::empty();
            while self.encoder.receive_packet(&mut packet).is_ok() {}
        }
        debug!(frames = self.frame_index, "H.264 encoder released");
    }
}

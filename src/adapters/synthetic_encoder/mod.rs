//! Encoder stand-in producing fake access units at a fixed frame rate

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::{AccessUnit, OutputSlot, SampleFlags, TrackFormat};
use crate::ports::{EncoderEvent, VideoEncoder};
use crate::utils::time::duration_to_us;

const DEFAULT_POOL_SIZE: usize = 8;
const DEFAULT_PAYLOAD_SIZE: usize = 64;

/// How presentation time relates to the wall clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// A unit is ready on every poll; time only advances per frame
    Virtual,
    /// Units become ready when the wall clock reaches their timestamp
    RealTime,
}

/// Counters for checking buffer hygiene
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStats {
    pub produced: u64,
    pub released: u64,
    pub in_flight: usize,
}

/// Produces numbered frames with a bounded pool of output slots.
///
/// When every slot is held by the consumer the encoder stalls and polls
/// time out, just like a hardware encoder whose buffers are not returned.
pub struct SyntheticEncoder {
    format: TrackFormat,
    pacing: Pacing,
    announced: bool,
    epoch: Option<Instant>,
    next_pts_us: i64,
    keyframe_interval: u64,
    payload_size: usize,
    slots: Vec<bool>,
    stats: EncoderStats,
}

impl SyntheticEncoder {
    pub fn new(format: TrackFormat, pacing: Pacing) -> Self {
        Self {
            format,
            pacing,
            announced: false,
            epoch: None,
            next_pts_us: 0,
            keyframe_interval: 1,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            slots: vec![false; DEFAULT_POOL_SIZE],
            stats: EncoderStats::default(),
        }
    }

    pub fn with_pool_size(mut self, slots: usize) -> Self {
        self.slots = vec![false; slots.max(1)];
        self
    }

    pub fn with_payload_size(mut self, bytes: usize) -> Self {
        self.payload_size = bytes.max(1);
        self
    }

    pub fn with_keyframe_interval(mut self, frames: u32) -> Self {
        self.keyframe_interval = u64::from(frames.max(1));
        self
    }

    pub fn stats(&self) -> EncoderStats {
        self.stats
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|in_use| !in_use)
    }

    fn next_unit(&mut self, slot: usize) -> AccessUnit {
        let frame = self.stats.produced;
        let flags = if frame % self.keyframe_interval == 0 {
            SampleFlags::KEY_FRAME
        } else {
            SampleFlags::NONE
        };
        let payload: Vec<u8> = frame
            .to_le_bytes()
            .iter()
            .copied()
            .cycle()
            .take(self.payload_size)
            .collect();

        let unit = AccessUnit {
            slot: OutputSlot(slot),
            payload,
            pts_us: self.next_pts_us,
            flags,
        };
        self.slots[slot] = true;
        self.next_pts_us += self.format.frame_interval_us();
        self.stats.produced += 1;
        self.stats.in_flight += 1;
        unit
    }

    /// Wall-clock wait before the next frame is due, if any
    fn wait_for_frame(&mut self) -> Duration {
        let epoch = *self.epoch.get_or_insert_with(Instant::now);
        let elapsed_us = duration_to_us(epoch.elapsed()) as i64;
        let ahead_us = self.next_pts_us - elapsed_us;
        if ahead_us > 0 {
            Duration::from_micros(ahead_us as u64)
        } else {
            Duration::ZERO
        }
    }
}

impl VideoEncoder for SyntheticEncoder {
    fn poll(&mut self, timeout: Duration) -> Result<EncoderEvent, DomainError> {
        if !self.announced {
            self.announced = true;
            debug!(fps = self.format.frame_rate, "Synthetic encoder output format ready");
            return Ok(EncoderEvent::FormatChanged(self.format.clone()));
        }

        let Some(slot) = self.free_slot() else {
            if self.pacing == Pacing::RealTime {
                std::thread::sleep(timeout);
            }
            return Ok(EncoderEvent::Timeout);
        };

        if self.pacing == Pacing::RealTime {
            let wait = self.wait_for_frame();
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(EncoderEvent::Timeout);
            }
            std::thread::sleep(wait);
        }

        Ok(EncoderEvent::Unit(self.next_unit(slot)))
    }

    fn release_output(&mut self, unit: AccessUnit) {
        match self.slots.get_mut(unit.slot.0) {
            Some(in_use) if *in_use => {
                *in_use = false;
                self.stats.released += 1;
                self.stats.in_flight -= 1;
            }
            _ => warn!(slot = unit.slot.0, "Released an output slot that was not in use"),
        }
    }
}

impl Drop for SyntheticEncoder {
    fn drop(&mut self) {
        debug!(
            produced = self.stats.produced,
            released = self.stats.released,
            "Synthetic encoder released"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::VideoCodec;

    fn encoder(pool: usize) -> SyntheticEncoder {
        let format = TrackFormat::video(VideoCodec::Raw, 16, 16, 100).unwrap();
        SyntheticEncoder::new(format, Pacing::Virtual).with_pool_size(pool)
    }

    fn unit(event: EncoderEvent) -> AccessUnit {
        match event {
            EncoderEvent::Unit(unit) => unit,
            other => panic!("expected a unit, got {:?}", other),
        }
    }

    #[test]
    fn test_format_precedes_units() {
        let mut enc = encoder(2);
        assert!(matches!(enc.poll(Duration::ZERO).unwrap(), EncoderEvent::FormatChanged(_)));
        let first = unit(enc.poll(Duration::ZERO).unwrap());
        let second = unit(enc.poll(Duration::ZERO).unwrap());
        assert_eq!(first.pts_us, 0);
        assert_eq!(second.pts_us, 10_000);
        assert!(first.flags.is_key_frame());
    }

    #[test]
    fn test_stalls_until_slots_are_released() {
        let mut enc = encoder(1);
        enc.poll(Duration::ZERO).unwrap();
        let held = unit(enc.poll(Duration::ZERO).unwrap());
        assert!(matches!(enc.poll(Duration::ZERO).unwrap(), EncoderEvent::Timeout));

        enc.release_output(held);
        assert!(matches!(enc.poll(Duration::ZERO).unwrap(), EncoderEvent::Unit(_)));
        assert_eq!(enc.stats().released, 1);
        assert_eq!(enc.stats().in_flight, 1);
    }
}

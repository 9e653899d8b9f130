//! Per-segment container writer lifecycle and timestamp renormalization

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::{Orientation, SampleFlags, SegmentSummary, TrackFormat};
use crate::ports::{MediaStore, WriterGuard};

/// Opens segment files through a [`MediaStore`]
#[derive(Clone)]
pub struct SegmentWriter {
    store: Arc<dyn MediaStore>,
}

impl SegmentWriter {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MediaStore> {
        &self.store
    }

    /// Create the file, add the single video track and start the write session.
    ///
    /// On failure nothing is returned, the writer is released and the
    /// partially created file is removed.
    pub fn open(&self, path: PathBuf, format: &TrackFormat, orientation: Orientation) -> Result<Segment, DomainError> {
        match self.try_open(&path, format, orientation) {
            Ok((writer, track)) => {
                info!(path = %path.display(), %orientation, "Segment writer started");
                Ok(Segment::new(path, writer, track))
            }
            Err(e) => {
                warn!(path = %path.display(), "Failed to open segment: {}", e);
                if let Err(remove_err) = std::fs::remove_file(&path) {
                    if remove_err.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial segment {}: {}", path.display(), remove_err);
                    }
                }
                Err(e)
            }
        }
    }

    fn try_open(
        &self,
        path: &Path,
        format: &TrackFormat,
        orientation: Orientation,
    ) -> Result<(WriterGuard, usize), DomainError> {
        let mut guard = WriterGuard::new(self.store.create_writer(path)?);
        let writer = guard.get_mut()?;
        let track = writer.add_track(format)?;
        writer.set_orientation_hint(orientation)?;
        writer.start()?;
        Ok((guard, track))
    }
}

/// Timing of one unit relative to its segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitTiming {
    /// Timestamp with the segment's first unit at zero
    pub renormalized_us: i64,
    /// Growth of the segment's elapsed length caused by this unit
    pub delta_us: u64,
}

/// One press-and-hold recording interval and its open container writer
pub struct Segment {
    path: PathBuf,
    writer: WriterGuard,
    track: usize,
    start_ref_us: Option<i64>,
    elapsed_us: i64,
    samples: u64,
    finalized: Option<SegmentSummary>,
}

impl Segment {
    fn new(path: PathBuf, writer: WriterGuard, track: usize) -> Self {
        Self {
            path,
            writer,
            track,
            start_ref_us: None,
            elapsed_us: 0,
            samples: 0,
            finalized: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn track(&self) -> usize {
        self.track
    }

    /// Encoder timestamp of the first unit, once observed
    pub fn start_reference_us(&self) -> Option<i64> {
        self.start_ref_us
    }

    pub fn elapsed_us(&self) -> i64 {
        self.elapsed_us
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.is_some()
    }

    /// Current path, length and sample count
    pub fn summary(&self) -> SegmentSummary {
        match &self.finalized {
            Some(summary) => summary.clone(),
            None => SegmentSummary {
                path: self.path.clone(),
                length_us: self.elapsed_us,
                samples: self.samples,
            },
        }
    }

    /// Renormalize an encoder timestamp and advance the elapsed length.
    ///
    /// The first call pins the zero point. Timestamps that go backwards are
    /// clamped so the segment's timeline never decreases.
    pub fn observe(&mut self, pts_us: i64) -> UnitTiming {
        let start = *self.start_ref_us.get_or_insert_with(|| {
            debug!(pts_us, "Segment first PTS");
            pts_us
        });
        let renormalized = (pts_us - start).max(self.elapsed_us);
        let delta = (renormalized - self.elapsed_us) as u64;
        self.elapsed_us = renormalized;
        UnitTiming {
            renormalized_us: renormalized,
            delta_us: delta,
        }
    }

    /// Append one unit at its renormalized timestamp
    pub fn write(&mut self, payload: &[u8], timestamp_us: i64, flags: SampleFlags) -> Result<(), DomainError> {
        if self.finalized.is_some() {
            return Err(DomainError::MuxFail(format!("Segment {} is already finalized", self.path.display())));
        }
        let track = self.track;
        self.writer.get_mut()?.write_sample(track, payload, timestamp_us, flags)?;
        self.samples += 1;
        trace!(size = payload.len(), pts_us = timestamp_us, "Wrote sample to segment");
        Ok(())
    }

    /// Stop and release the writer. Repeated calls return the first summary.
    ///
    /// The writer is released even when stopping fails; the error is still
    /// reported to the caller.
    pub fn finalize(&mut self) -> Result<SegmentSummary, DomainError> {
        if let Some(summary) = &self.finalized {
            return Ok(summary.clone());
        }

        let stopped = self.writer.finish();
        let summary = self.summary();
        self.finalized = Some(summary.clone());

        match stopped {
            Ok(()) => {
                info!(
                    path = %self.path.display(),
                    length_ms = self.elapsed_us / 1_000,
                    samples = self.samples,
                    "Segment finalized"
                );
                Ok(summary)
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("track", &self.track)
            .field("start_ref_us", &self.start_ref_us)
            .field("elapsed_us", &self.elapsed_us)
            .field("samples", &self.samples)
            .field("finalized", &self.finalized.is_some())
            .finish()
    }
}

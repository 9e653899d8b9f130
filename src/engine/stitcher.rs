//! Concatenates a session's segments into one continuous file

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::{Orientation, PhaseEvent, SampleFlags, StitchReport, TrackFormat};
use crate::engine::events::{EventSink, RecorderEvent};
use crate::engine::session::SessionState;
use crate::output::{remove_files, MediaLibrary};
use crate::ports::{MediaIndex, MediaStore, ReaderGuard, WriterGuard};

/// Segments handed over by the drain loop when a session ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchJob {
    pub segments: Vec<PathBuf>,
    /// Cumulative recorded time at hand-off
    pub recorded_us: u64,
}

/// Merges segment files in order, shifting each by the running offset
pub struct Stitcher {
    store: Arc<dyn MediaStore>,
    library: MediaLibrary,
    index: Arc<dyn MediaIndex>,
    orientation: Orientation,
    delete_sources: bool,
}

impl Stitcher {
    pub fn new(
        store: Arc<dyn MediaStore>,
        library: MediaLibrary,
        index: Arc<dyn MediaIndex>,
        orientation: Orientation,
    ) -> Self {
        Self {
            store,
            library,
            index,
            orientation,
            delete_sources: true,
        }
    }

    /// Keep segment files after stitching instead of deleting them
    pub fn keep_sources(mut self, keep: bool) -> Self {
        self.delete_sources = !keep;
        self
    }

    pub fn library(&self) -> &MediaLibrary {
        &self.library
    }

    /// Merge `segments` into a new output file.
    ///
    /// The output is written under a hidden temporary name and only moved to
    /// its final name once complete, so a failure never leaves a partial
    /// result behind. Source segments are deleted whether or not the merge
    /// succeeds, unless [`keep_sources`](Self::keep_sources) is set.
    pub fn stitch(&self, segments: &[PathBuf]) -> Result<StitchReport, DomainError> {
        let result = self.merge(segments);

        if self.delete_sources {
            remove_files(segments.iter().map(|p| p.as_path()));
        }

        match &result {
            Ok(report) => {
                self.index.notify(&report.output, self.store.mime_type());
                info!(
                    output = %report.output.display(),
                    segments = report.segments,
                    duration_ms = report.duration_us / 1_000,
                    "Merge complete"
                );
            }
            Err(e) => error!("Stitching failed: {}", e),
        }
        result
    }

    fn merge(&self, segments: &[PathBuf]) -> Result<StitchReport, DomainError> {
        if segments.is_empty() {
            return Err(DomainError::BadArgs("No segments to stitch".to_string()));
        }
        self.library.ensure_root()?;

        let suffix = format!(".{}", self.library.extension());
        let temp = tempfile::Builder::new()
            .prefix(".stitch-")
            .suffix(&suffix)
            .tempfile_in(self.library.root())
            .map_err(|e| DomainError::FsFail(format!("Failed to create stitch output: {}", e)))?
            .into_temp_path();

        let mut merged = MergedOutput::new(WriterGuard::new(self.store.create_writer(&temp)?), self.orientation);
        for path in segments {
            self.append_segment(&mut merged, path)?;
        }
        let report_parts = merged.finish()?;

        let output = self.library.output_path(Local::now());
        temp.persist(&output)
            .map_err(|e| DomainError::FsFail(format!("Failed to move output to {}: {}", output.display(), e)))?;

        Ok(StitchReport {
            output,
            segments: report_parts.segments,
            samples: report_parts.samples,
            duration_us: report_parts.offset_us,
            boundaries_us: report_parts.boundaries_us,
        })
    }

    fn append_segment(&self, merged: &mut MergedOutput, path: &Path) -> Result<(), DomainError> {
        let mut reader = ReaderGuard::new(self.store.open_reader(path)?);
        if reader.track_count() == 0 {
            warn!("No video track in {}; skipping", path.display());
            return Ok(());
        }

        let format = reader.track_format(0)?;
        reader.select_track(0)?;
        merged.begin_segment(&format)?;

        let mut buf = Vec::new();
        let mut last_in_segment: Option<i64> = None;
        while let Some(meta) = reader.read_sample(&mut buf)? {
            let payload = buf
                .get(..meta.size)
                .ok_or_else(|| DomainError::DemuxFail(format!("Short sample read from {}", path.display())))?;
            merged.write(payload, meta.timestamp_us, meta.flags)?;
            last_in_segment = Some(meta.timestamp_us);
        }

        let duration_us = format
            .duration_us
            .unwrap_or_else(|| last_in_segment.map_or(0, |last| last + format.frame_interval_us()));
        debug!(path = %path.display(), duration_us, "Appended segment");
        merged.end_segment(duration_us);
        Ok(())
    }
}

struct MergeTotals {
    segments: usize,
    samples: u64,
    offset_us: i64,
    boundaries_us: Vec<i64>,
}

/// Output writer plus the running timeline of the merge
struct MergedOutput {
    writer: WriterGuard,
    orientation: Orientation,
    track: Option<usize>,
    last_ts: Option<i64>,
    totals: MergeTotals,
}

impl MergedOutput {
    fn new(writer: WriterGuard, orientation: Orientation) -> Self {
        Self {
            writer,
            orientation,
            track: None,
            last_ts: None,
            totals: MergeTotals {
                segments: 0,
                samples: 0,
                offset_us: 0,
                boundaries_us: Vec::new(),
            },
        }
    }

    /// The first usable segment defines the output track
    fn begin_segment(&mut self, format: &TrackFormat) -> Result<(), DomainError> {
        if self.track.is_none() {
            let mut track_format = format.clone();
            track_format.duration_us = None;
            let writer = self.writer.get_mut()?;
            let track = writer.add_track(&track_format)?;
            writer.set_orientation_hint(self.orientation)?;
            writer.start()?;
            self.track = Some(track);
        } else {
            self.totals.boundaries_us.push(self.totals.offset_us);
        }
        Ok(())
    }

    fn write(&mut self, payload: &[u8], timestamp_us: i64, flags: SampleFlags) -> Result<(), DomainError> {
        let track = self
            .track
            .ok_or_else(|| DomainError::InternalError("Output track not created".to_string()))?;

        let mut ts = self.totals.offset_us + timestamp_us;
        if let Some(last) = self.last_ts {
            if ts <= last {
                ts = last + 1;
            }
        }
        self.writer.get_mut()?.write_sample(track, payload, ts, flags)?;
        self.last_ts = Some(ts);
        self.totals.samples += 1;
        Ok(())
    }

    fn end_segment(&mut self, duration_us: i64) {
        self.totals.offset_us += duration_us;
        self.totals.segments += 1;
    }

    fn finish(mut self) -> Result<MergeTotals, DomainError> {
        if self.track.is_none() {
            return Err(DomainError::DemuxFail("None of the segments had a video track".to_string()));
        }
        self.writer.finish()?;
        Ok(self.totals)
    }
}

/// Runs stitch jobs off the drain thread and closes out the session
pub struct StitchWorker {
    jobs: Receiver<StitchJob>,
    stitcher: Stitcher,
    state: Arc<SessionState>,
    events: EventSink,
}

impl StitchWorker {
    pub fn new(jobs: Receiver<StitchJob>, stitcher: Stitcher, state: Arc<SessionState>, events: EventSink) -> Self {
        Self {
            jobs,
            stitcher,
            state,
            events,
        }
    }

    /// Process jobs until the drain loop drops its sender
    pub fn run(self) {
        info!("Stitch worker started");
        while let Ok(job) = self.jobs.recv() {
            match self.process(job) {
                Ok(report) => debug!(output = %report.output.display(), "Stitch job done"),
                Err(e) => debug!("Stitch job failed, waiting for the next one: {}", e),
            }
        }
        info!("Stitch worker stopped");
    }

    /// Wait up to `timeout` for one job and process it
    pub fn process_next(&self, timeout: Duration) -> Option<Result<StitchReport, DomainError>> {
        match self.jobs.recv_timeout(timeout) {
            Ok(job) => Some(self.process(job)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn process(&self, job: StitchJob) -> Result<StitchReport, DomainError> {
        info!(
            segments = job.segments.len(),
            recorded_ms = job.recorded_us / 1_000,
            "Stitching session"
        );
        let result = self.stitcher.stitch(&job.segments);

        // The session is over whatever the outcome
        self.state.reset_recorded();
        if let Err(e) = self.state.phase_cell().apply(PhaseEvent::StitchCompleted) {
            warn!("Could not leave stitching phase: {}", e);
        }

        match &result {
            Ok(report) => self.events.emit(RecorderEvent::StitchCompleted { report: report.clone() }),
            Err(e) => self.events.emit(RecorderEvent::StitchFailed { reason: e.to_string() }),
        }
        result
    }
}

//! Encoder drain loop: pulls access units and routes them into segments

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, trace, warn};

use crate::domain::errors::DomainError;
use crate::domain::model::{AccessUnit, Orientation, Phase, PhaseEvent, TrackFormat};
use crate::engine::events::{EventSink, RecorderEvent};
use crate::engine::segment::{Segment, SegmentWriter};
use crate::engine::session::SessionState;
use crate::engine::stitcher::StitchJob;
use crate::output::{remove_files, MediaLibrary};
use crate::ports::{EncoderEvent, VideoEncoder};
use crate::utils::time::us_to_ms;

/// Requests from the control thread to the drain loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainCommand {
    /// Open the writer for the segment that was just started
    OpenSegment { orientation: Orientation },
    /// Leave the loop and tear down
    Shutdown,
}

/// Encoder poll timeouts per phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimeouts {
    /// While idle or recording
    pub idle: Duration,
    /// While waiting for the final unit of a segment
    pub finishing: Duration,
}

impl PollTimeouts {
    pub fn for_phase(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Finishing => self.finishing,
            Phase::Idle | Phase::Recording | Phase::Stitching => self.idle,
        }
    }
}

impl Default for PollTimeouts {
    fn default() -> Self {
        Self {
            idle: Duration::from_millis(10),
            finishing: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Shutdown,
}

/// What the loop leaves behind when it exits
#[derive(Debug)]
pub struct DrainReport {
    /// Set when the loop died instead of being shut down
    pub error: Option<DomainError>,
    /// Segment files recorded but never handed to the stitcher
    pub pending_segments: Vec<PathBuf>,
}

/// Channels connecting the drain loop to the rest of the pipeline
pub struct DrainLinks {
    pub commands: Receiver<DrainCommand>,
    pub stitch_jobs: Sender<StitchJob>,
    pub events: EventSink,
}

/// Sole owner of the encoder and of the active segment's writer
pub struct DrainLoop<E: VideoEncoder> {
    encoder: E,
    state: Arc<SessionState>,
    writer: SegmentWriter,
    library: MediaLibrary,
    links: DrainLinks,
    timeouts: PollTimeouts,
    format: Option<TrackFormat>,
    active: Option<Segment>,
    segments: Vec<PathBuf>,
}

impl<E: VideoEncoder> DrainLoop<E> {
    pub fn new(
        encoder: E,
        state: Arc<SessionState>,
        writer: SegmentWriter,
        library: MediaLibrary,
        links: DrainLinks,
        timeouts: PollTimeouts,
    ) -> Self {
        Self {
            encoder,
            state,
            writer,
            library,
            links,
            timeouts,
            format: None,
            active: None,
            segments: Vec::new(),
        }
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn active_segment(&self) -> Option<&Segment> {
        self.active.as_ref()
    }

    /// Segment files of the current session, in recording order
    pub fn segments(&self) -> &[PathBuf] {
        &self.segments
    }

    pub fn format(&self) -> Option<&TrackFormat> {
        self.format.as_ref()
    }

    /// Run until shut down or until the encoder fails
    pub fn run(mut self) -> DrainReport {
        info!("Encoder drain loop started");
        let error = loop {
            match self.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Shutdown) => break None,
                Err(e) => {
                    error!(class = ?e.class(), "Encoder output loop error: {}", e);
                    self.links.events.emit(RecorderEvent::DrainFailed { reason: e.to_string() });
                    break Some(e);
                }
            }
        };
        self.teardown(error)
    }

    /// One iteration: handle pending commands, then one bounded encoder poll
    pub fn step(&mut self) -> Result<StepOutcome, DomainError> {
        if self.handle_commands()? {
            return Ok(StepOutcome::Shutdown);
        }

        let polled_in = self.state.phase();
        match self.encoder.poll(self.timeouts.for_phase(polled_in))? {
            EncoderEvent::FormatChanged(format) => self.on_format(format),
            EncoderEvent::Unit(unit) => self.on_unit(unit)?,
            EncoderEvent::Timeout => self.on_timeout(polled_in)?,
        }
        Ok(StepOutcome::Continue)
    }

    /// Returns true when the loop should stop
    fn handle_commands(&mut self) -> Result<bool, DomainError> {
        loop {
            match self.links.commands.try_recv() {
                Ok(DrainCommand::OpenSegment { orientation }) => self.open_segment(orientation)?,
                Ok(DrainCommand::Shutdown) => return Ok(true),
                Err(TryRecvError::Empty) => return Ok(false),
                Err(TryRecvError::Disconnected) => {
                    debug!("Control channel closed");
                    return Ok(true);
                }
            }
        }
    }

    fn open_segment(&mut self, orientation: Orientation) -> Result<(), DomainError> {
        let phase = self.state.phase();
        if !phase.is_capturing() {
            warn!(%phase, "Ignoring segment open request");
            return Ok(());
        }
        if self.active.is_some() {
            warn!("A segment is already active; ignoring open request");
            return Ok(());
        }

        let opened = match &self.format {
            Some(format) => {
                let path = self.library.segment_path(Utc::now());
                self.writer.open(path, format, orientation)
            }
            None => Err(DomainError::NotReady("Encoder output format unknown".to_string())),
        };

        match opened {
            Ok(segment) => {
                self.segments.push(segment.path().to_path_buf());
                self.links.events.emit(RecorderEvent::SegmentOpened {
                    path: segment.path().to_path_buf(),
                });
                self.active = Some(segment);
            }
            Err(e) => {
                self.state.phase_cell().apply(PhaseEvent::SegmentAborted)?;
                self.links.events.emit(RecorderEvent::SegmentRejected { reason: e.to_string() });
            }
        }
        Ok(())
    }

    fn on_format(&mut self, format: TrackFormat) {
        if self.format.is_some() {
            warn!("Encoder output format changed again; later segments use the new format");
        }
        info!(
            mime = format.mime(),
            width = format.width,
            height = format.height,
            fps = format.frame_rate,
            "Encoder output format changed"
        );
        self.format = Some(format.clone());
        self.state.set_format_ready(true);
        self.links.events.emit(RecorderEvent::FormatReady { format });
    }

    fn on_unit(&mut self, unit: AccessUnit) -> Result<(), DomainError> {
        let forwarded = self.forward(&unit);
        self.encoder.release_output(unit);

        if forwarded? && (self.state.phase() == Phase::Finishing || self.state.cap_reached()) {
            self.finish_segment()?;
        }
        Ok(())
    }

    /// Write the unit into the active segment; false when it was not routed
    fn forward(&mut self, unit: &AccessUnit) -> Result<bool, DomainError> {
        if !self.state.phase().is_capturing() || !unit.is_media() {
            return Ok(false);
        }
        let Some(segment) = self.active.as_mut() else {
            trace!(pts_us = unit.pts_us, "No open segment yet; unit not recorded");
            return Ok(false);
        };

        let timing = segment.observe(unit.pts_us);
        let recorded = self.state.add_recorded(timing.delta_us);
        trace!(
            size = unit.size(),
            pts_us = timing.renormalized_us,
            recorded_us = recorded,
            "Forwarding access unit"
        );
        segment.write(&unit.payload, timing.renormalized_us, unit.flags)?;
        Ok(true)
    }

    fn on_timeout(&mut self, polled_in: Phase) -> Result<(), DomainError> {
        if polled_in == Phase::Finishing && self.active.is_some() {
            warn!("Timeout waiting for last frame. Finalizing segment anyway.");
            self.finish_segment()?;
        }
        Ok(())
    }

    /// Finalize the active segment and leave `Finishing`
    fn finish_segment(&mut self) -> Result<(), DomainError> {
        let Some(mut segment) = self.active.take() else {
            return Ok(());
        };

        if self.state.phase() == Phase::Recording {
            if let Err(e) = self.state.phase_cell().apply(PhaseEvent::CapReached) {
                // A concurrent release may already have moved us to Finishing
                if self.state.phase() != Phase::Finishing {
                    return Err(e);
                }
            }
        }

        if let Err(e) = segment.finalize() {
            warn!("Error finalizing segment writer: {}", e);
        }
        let summary = segment.summary();
        drop(segment);

        let recorded_us = self.state.recorded_us();
        let cap_reached = self.state.cap_reached();
        info!(
            "Final length: {} ms. Total recorded: {} ms",
            us_to_ms(summary.length_us),
            recorded_us / 1_000
        );

        let (_, next) = self
            .state
            .phase_cell()
            .apply(PhaseEvent::SegmentFinalized { cap_reached })?;

        self.links.events.emit(RecorderEvent::SegmentFinalized {
            path: summary.path,
            length_us: summary.length_us,
            samples: summary.samples,
            recorded_us,
        });

        if next == Phase::Stitching {
            self.hand_off_to_stitcher(recorded_us)?;
        }
        Ok(())
    }

    fn hand_off_to_stitcher(&mut self, recorded_us: u64) -> Result<(), DomainError> {
        let segments = std::mem::take(&mut self.segments);
        info!(count = segments.len(), "Recording finished. Handing segments to the stitcher");
        self.links.events.emit(RecorderEvent::StitchStarted { segments: segments.len() });

        if let Err(rejected) = self.links.stitch_jobs.send(StitchJob { segments, recorded_us }) {
            let job = rejected.0;
            error!("Stitch worker is gone; discarding {} segment(s)", job.segments.len());
            remove_files(job.segments.iter().map(|p| p.as_path()));
            self.state.reset_recorded();
            self.state.phase_cell().apply(PhaseEvent::StitchCompleted)?;
            self.links.events.emit(RecorderEvent::StitchFailed {
                reason: "stitch worker unavailable".to_string(),
            });
        }
        Ok(())
    }

    /// Release the encoder, then the in-flight segment writer
    fn teardown(self, error: Option<DomainError>) -> DrainReport {
        let DrainLoop {
            encoder,
            state,
            active,
            segments,
            ..
        } = self;

        state.set_format_ready(false);
        drop(encoder);

        if let Some(mut segment) = active {
            if let Err(e) = segment.finalize() {
                warn!("Error finalizing in-flight segment: {}", e);
            }
        }

        if state.phase() != Phase::Stitching {
            state.force(Phase::Idle);
            state.reset_recorded();
        }

        info!(pending = segments.len(), "Encoder drain loop stopped");
        DrainReport {
            error,
            pending_segments: segments,
        }
    }
}

//! Recorder facade: wires the control surface, drain loop and stitch worker

use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, error, info, warn};

use crate::config::RecorderSettings;
use crate::domain::errors::DomainError;
use crate::domain::model::{Orientation, Phase, PhaseEvent};
use crate::domain::rules::PhaseRules;
use crate::engine::drain::{DrainCommand, DrainLinks, DrainLoop, DrainReport, PollTimeouts};
use crate::engine::events::{EventSink, RecorderEvent};
use crate::engine::progress::ProgressReporter;
use crate::engine::segment::SegmentWriter;
use crate::engine::session::SessionState;
use crate::engine::stitcher::{StitchWorker, Stitcher};
use crate::output::MediaLibrary;
use crate::ports::{MediaIndex, MediaStore, VideoEncoder};

const COMMAND_QUEUE_DEPTH: usize = 4;

/// Control-thread side of a session: press, release and camera orientation
pub struct SessionControl {
    state: Arc<SessionState>,
    commands: SyncSender<DrainCommand>,
    orientation: AtomicU16,
}

impl SessionControl {
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn orientation(&self) -> Orientation {
        Orientation::from_degrees(i32::from(self.orientation.load(Ordering::Acquire)))
            .unwrap_or(Orientation::UPRIGHT)
    }

    /// Press: begin a new segment.
    ///
    /// Rejected with `NotReady` until the encoder has announced its output
    /// format, and with `InvalidTransition` unless the session is idle.
    pub fn start_segment(&self) -> Result<(), DomainError> {
        if !self.state.format_ready() {
            return Err(DomainError::NotReady("Encoder output format not known yet".to_string()));
        }
        self.state.phase_cell().apply(PhaseEvent::StartSegment)?;

        let orientation = self.orientation();
        if let Err(e) = self.commands.try_send(DrainCommand::OpenSegment { orientation }) {
            let reason = match e {
                TrySendError::Full(_) => "command queue full",
                TrySendError::Disconnected(_) => "drain loop stopped",
            };
            if let Err(revert) = self.state.phase_cell().apply(PhaseEvent::SegmentAborted) {
                warn!("Could not revert segment start: {}", revert);
            }
            return Err(DomainError::ResourceUnavailable(format!("Cannot open segment: {}", reason)));
        }
        info!(%orientation, "Segment start requested");
        Ok(())
    }

    /// Release: ask the drain loop to finish the current segment.
    ///
    /// Returns false, changing nothing, unless a segment is recording.
    pub fn stop_segment(&self) -> bool {
        match self.state.phase_cell().apply(PhaseEvent::StopSegment) {
            Ok(_) => {
                info!("Segment stop requested");
                true
            }
            Err(e) => {
                debug!("Ignoring stop: {}", e);
                false
            }
        }
    }

    /// Orientation hint for future segments; refused while capturing
    pub fn set_orientation(&self, orientation: Orientation) -> Result<(), DomainError> {
        let phase = self.state.phase();
        if !PhaseRules::allows_reconfiguration(phase) {
            return Err(DomainError::Busy(format!("Cannot change orientation while {}", phase)));
        }
        self.orientation.store(orientation.degrees(), Ordering::Release);
        info!(%orientation, "Segment orientation changed");
        Ok(())
    }

    fn request_shutdown(&self) {
        if self.commands.send(DrainCommand::Shutdown).is_err() {
            debug!("Drain loop already gone");
        }
    }
}

/// Collaborators injected into the pipeline
#[derive(Clone)]
pub struct RecorderDeps {
    pub store: Arc<dyn MediaStore>,
    pub index: Arc<dyn MediaIndex>,
}

/// The unspawned pieces of a recorder
pub struct Pipeline<E: VideoEncoder> {
    pub control: SessionControl,
    pub drain: DrainLoop<E>,
    pub stitch_worker: StitchWorker,
    pub events: UnboundedReceiver<RecorderEvent>,
    pub progress: ProgressReporter,
}

/// Build the pipeline for `encoder` without starting any thread
pub fn assemble<E: VideoEncoder>(
    settings: &RecorderSettings,
    encoder: E,
    deps: RecorderDeps,
) -> Result<Pipeline<E>, DomainError> {
    settings.validate()?;

    let library = MediaLibrary::new(&settings.media_dir, deps.store.extension());
    library.ensure_root()?;

    let state = Arc::new(SessionState::new(settings.cap_us()));
    let (command_tx, command_rx) = mpsc::sync_channel(COMMAND_QUEUE_DEPTH);
    let (job_tx, job_rx) = mpsc::channel();
    let (event_tx, event_rx) = unbounded_channel();
    let events = EventSink::new(event_tx);

    let stitcher = Stitcher::new(
        Arc::clone(&deps.store),
        library.clone(),
        Arc::clone(&deps.index),
        settings.output_orientation,
    );
    let stitch_worker = StitchWorker::new(job_rx, stitcher, Arc::clone(&state), events.clone());

    let drain = DrainLoop::new(
        encoder,
        Arc::clone(&state),
        SegmentWriter::new(deps.store),
        library,
        DrainLinks {
            commands: command_rx,
            stitch_jobs: job_tx,
            events,
        },
        PollTimeouts {
            idle: settings.idle_poll(),
            finishing: settings.finishing_poll(),
        },
    );

    let control = SessionControl {
        state: Arc::clone(&state),
        commands: command_tx,
        orientation: AtomicU16::new(settings.segment_orientation.degrees()),
    };

    Ok(Pipeline {
        control,
        drain,
        stitch_worker,
        events: event_rx,
        progress: ProgressReporter::new(state, settings.progress_interval()),
    })
}

/// What a shut-down recorder leaves behind
#[derive(Debug)]
pub struct ShutdownReport {
    /// Fatal drain error, if the loop died before shutdown
    pub drain_error: Option<DomainError>,
    /// Segment files that were never stitched
    pub unstitched: Vec<PathBuf>,
}

/// A running pipeline: drain loop and stitch worker on their own threads
pub struct Recorder {
    control: SessionControl,
    progress: ProgressReporter,
    drain: Option<JoinHandle<DrainReport>>,
    stitch: Option<JoinHandle<()>>,
}

impl Recorder {
    /// Start the pipeline threads; events are returned to the caller
    pub fn spawn<E: VideoEncoder + 'static>(
        settings: &RecorderSettings,
        encoder: E,
        deps: RecorderDeps,
    ) -> Result<(Self, UnboundedReceiver<RecorderEvent>), DomainError> {
        let pipeline = assemble(settings, encoder, deps)?;
        let Pipeline {
            control,
            drain,
            stitch_worker,
            events,
            progress,
        } = pipeline;

        let stitch = std::thread::Builder::new()
            .name("holdrec-stitch".to_string())
            .spawn(move || stitch_worker.run())
            .map_err(|e| DomainError::ResourceUnavailable(format!("Failed to spawn stitch worker: {}", e)))?;

        let drain = std::thread::Builder::new()
            .name("holdrec-drain".to_string())
            .spawn(move || drain.run())
            .map_err(|e| DomainError::ResourceUnavailable(format!("Failed to spawn drain loop: {}", e)))?;

        info!("Recorder started");
        Ok((
            Self {
                control,
                progress,
                drain: Some(drain),
                stitch: Some(stitch),
            },
            events,
        ))
    }

    pub fn control(&self) -> &SessionControl {
        &self.control
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    pub fn phase(&self) -> Phase {
        self.control.state.phase()
    }

    /// Stop the drain loop (encoder first, then the in-flight segment),
    /// let any pending stitch finish, and report what was left unstitched
    pub fn shutdown(mut self) -> ShutdownReport {
        self.stop_threads()
    }

    fn stop_threads(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport {
            drain_error: None,
            unstitched: Vec::new(),
        };

        if let Some(drain) = self.drain.take() {
            self.control.request_shutdown();
            match drain.join() {
                Ok(drained) => {
                    report.drain_error = drained.error;
                    report.unstitched = drained.pending_segments;
                }
                Err(_) => error!("Drain loop thread panicked"),
            }
        }

        // The drain loop owned the only job sender, so the worker exits once idle
        if let Some(stitch) = self.stitch.take() {
            if stitch.join().is_err() {
                error!("Stitch worker thread panicked");
            }
        }

        if !report.unstitched.is_empty() {
            warn!(count = report.unstitched.len(), "Recorder stopped with unstitched segments");
        }
        info!("Recorder stopped");
        report
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.drain.is_some() || self.stitch.is_some() {
            let _ = self.stop_threads();
        }
    }
}

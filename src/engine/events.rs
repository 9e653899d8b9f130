//! Notices emitted by the recorder for the UI layer

use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::domain::model::{StitchReport, TrackFormat};

/// Something the UI may want to surface
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecorderEvent {
    /// Encoder warm-up finished; segments can start
    FormatReady { format: TrackFormat },
    SegmentOpened { path: PathBuf },
    /// A start request could not be honoured
    SegmentRejected { reason: String },
    SegmentFinalized {
        path: PathBuf,
        length_us: i64,
        samples: u64,
        recorded_us: u64,
    },
    StitchStarted { segments: usize },
    StitchCompleted { report: StitchReport },
    StitchFailed { reason: String },
    /// The drain loop died; the encoder must be recreated
    DrainFailed { reason: String },
}

/// Sending half shared by the pipeline threads
#[derive(Debug, Clone)]
pub struct EventSink(Option<UnboundedSender<RecorderEvent>>);

impl EventSink {
    pub fn new(sender: UnboundedSender<RecorderEvent>) -> Self {
        Self(Some(sender))
    }

    /// A sink that drops everything
    pub fn disabled() -> Self {
        Self(None)
    }

    /// Never blocks; a closed receiver just means nobody is listening
    pub fn emit(&self, event: RecorderEvent) {
        if let Some(sender) = &self.0 {
            if sender.send(event).is_err() {
                trace!("Event receiver dropped");
            }
        }
    }
}

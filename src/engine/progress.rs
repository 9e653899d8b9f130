//! Progress reporting for UI integration

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::model::{Phase, ProgressSnapshot};
use crate::engine::session::SessionState;
use crate::ports::ProgressSink;
use crate::utils::time::format_us;

/// Samples the session state at a fixed cadence for a progress indicator
#[derive(Clone)]
pub struct ProgressReporter {
    state: Arc<SessionState>,
    cadence: Duration,
}

impl ProgressReporter {
    pub fn new(state: Arc<SessionState>, cadence: Duration) -> Self {
        Self { state, cadence }
    }

    /// Read-only view; never blocks the drain loop
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.snapshot()
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Push snapshots to `sink` from a background thread until the handle is stopped
    pub fn spawn(&self, sink: Arc<dyn ProgressSink>) -> std::io::Result<ProgressHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let reporter = self.clone();
        let flag = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name("holdrec-progress".to_string())
            .spawn(move || {
                debug!("Progress reporter started");
                let mut last: Option<ProgressSnapshot> = None;
                while !flag.load(Ordering::Acquire) {
                    let snapshot = reporter.snapshot();
                    if last.as_ref() != Some(&snapshot) {
                        sink.on_progress(&snapshot);
                        last = Some(snapshot);
                    }
                    std::thread::sleep(reporter.cadence);
                }
                debug!("Progress reporter stopped");
            })?;
        Ok(ProgressHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Stops the reporter thread when dropped
pub struct ProgressHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ProgressHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Progress reporter thread panicked");
            }
        }
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Console progress bar for CLI usage
pub struct ConsoleProgress {
    width: usize,
}

impl ConsoleProgress {
    pub fn new(width: usize) -> Self {
        Self { width: width.max(1) }
    }

    pub fn render(&self, snapshot: &ProgressSnapshot) -> String {
        let filled = (snapshot.fraction() * self.width as f32).round() as usize;
        let filled = filled.min(self.width);
        let bar = "#".repeat(filled) + &"-".repeat(self.width - filled);
        format!(
            "[{}] {} / {} ({})",
            bar,
            format_us(snapshot.recorded_us as i64),
            format_us(snapshot.cap_us as i64),
            snapshot.phase
        )
    }
}

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        if snapshot.phase == Phase::Idle && snapshot.recorded_us == 0 {
            return;
        }
        eprint!("\r{}", self.render(snapshot));
        if snapshot.phase == Phase::Stitching {
            eprintln!();
        }
    }
}

#[derive(Serialize)]
struct ProgressLine<'a> {
    event: &'static str,
    #[serde(flatten)]
    snapshot: &'a ProgressSnapshot,
    fraction: f32,
}

/// JSON progress lines for structured output
pub struct JsonProgress;

impl ProgressSink for JsonProgress {
    fn on_progress(&self, snapshot: &ProgressSnapshot) {
        let line = ProgressLine {
            event: "progress",
            snapshot,
            fraction: snapshot.fraction(),
        };
        match serde_json::to_string(&line) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("Could not serialize progress: {}", e),
        }
    }
}

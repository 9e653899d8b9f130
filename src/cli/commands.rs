//! Command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info, warn};

#[cfg(feature = "libav")]
use crate::adapters::{LibavEncoder, LibavMediaStore};
use crate::adapters::{Pacing, SyntheticEncoder, TraceMediaStore, TracingMediaIndex, TRACE_EXTENSION};
use crate::cli::args::{Backend, LibraryArgs, ListFormat, RecordArgs, StitchArgs};
use crate::cli::script::{parse_script, ConsoleCommand, ScriptStep};
use crate::config::RecorderSettings;
use crate::domain::model::{Orientation, Phase, StitchReport};
use crate::engine::{ConsoleProgress, JsonProgress, Recorder, RecorderDeps, RecorderEvent, Stitcher};
use crate::error::HoldrecError;
use crate::output::{remove_files, MediaEntry, MediaLibrary};
use crate::ports::{MediaStore, ProgressSink, VideoEncoder};
use crate::utils::time::{format_clock, format_us};

const READY_TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);
const PHASE_POLL: Duration = Duration::from_millis(10);

/// Container backend for `backend`
pub fn media_store(backend: Backend) -> Result<Arc<dyn MediaStore>, HoldrecError> {
    match backend {
        Backend::Trace => Ok(Arc::new(TraceMediaStore::new())),
        #[cfg(feature = "libav")]
        Backend::Libav => {
            let store = LibavMediaStore::new().map_err(|e| HoldrecError::BackendInitError {
                message: e.to_string(),
            })?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "libav"))]
        Backend::Libav => Err(HoldrecError::BackendUnavailable {
            name: backend.name().to_string(),
        }),
    }
}

/// File extension written by `backend`, without needing to initialize it
pub fn backend_extension(backend: Backend) -> &'static str {
    match backend {
        Backend::Libav => "mp4",
        Backend::Trace => TRACE_EXTENSION,
    }
}

/// Execute the record command
pub async fn record(args: RecordArgs, settings: RecorderSettings) -> Result<()> {
    let script = args.script.as_deref().map(parse_script).transpose()?;
    let deps = RecorderDeps {
        store: media_store(args.backend)?,
        index: Arc::new(TracingMediaIndex::new()),
    };

    info!(
        backend = args.backend.name(),
        cap_ms = settings.cap_ms,
        media_dir = %settings.media_dir.display(),
        "Starting recorder"
    );

    match args.backend {
        Backend::Trace => {
            let encoder = SyntheticEncoder::new(settings.video.track_format()?, Pacing::RealTime)
                .with_keyframe_interval(settings.video.keyframe_interval);
            run_session(&args, &settings, encoder, deps, script).await
        }
        #[cfg(feature = "libav")]
        Backend::Libav => {
            let encoder = LibavEncoder::new(&settings.video)?;
            run_session(&args, &settings, encoder, deps, script).await
        }
        #[cfg(not(feature = "libav"))]
        Backend::Libav => Err(HoldrecError::BackendUnavailable {
            name: args.backend.name().to_string(),
        }
        .into()),
    }
}

async fn run_session<E: VideoEncoder + 'static>(
    args: &RecordArgs,
    settings: &RecorderSettings,
    encoder: E,
    deps: RecorderDeps,
    script: Option<Vec<ScriptStep>>,
) -> Result<()> {
    let (recorder, events) = Recorder::spawn(settings, encoder, deps)?;

    let sink: Arc<dyn ProgressSink> = if args.json {
        Arc::new(JsonProgress)
    } else {
        Arc::new(ConsoleProgress::new(30))
    };
    let progress = recorder.progress().spawn(sink)?;
    let printer = tokio::spawn(print_events(events, args.json));

    let outcome = match script {
        Some(steps) => run_script(&recorder, &steps).await,
        None => run_interactive(&recorder).await,
    };

    progress.stop();
    let report = tokio::task::spawn_blocking(move || recorder.shutdown())
        .await
        .context("Recorder shutdown task failed")?;
    if let Err(e) = printer.await {
        warn!("Event printer stopped abnormally: {}", e);
    }

    if let Some(e) = &report.drain_error {
        error!(recoverable = e.is_recoverable(), "Recording stopped after an encoder failure: {}", e);
    }
    if !report.unstitched.is_empty() {
        if args.keep_segments {
            info!(count = report.unstitched.len(), "Keeping unstitched segments");
        } else {
            let removed = remove_files(report.unstitched.iter().map(|p| p.as_path()));
            info!(removed, "Discarded unstitched segments");
        }
    }
    outcome
}

async fn wait_for_format(recorder: &Recorder) -> Result<()> {
    let started = Instant::now();
    while !recorder.control().state().format_ready() {
        if started.elapsed() > READY_TIMEOUT {
            bail!("Encoder did not report its output format within {:?}", READY_TIMEOUT);
        }
        tokio::time::sleep(PHASE_POLL).await;
    }
    Ok(())
}

async fn wait_for_idle(recorder: &Recorder) -> Result<()> {
    let started = Instant::now();
    while recorder.phase() != Phase::Idle {
        if started.elapsed() > SETTLE_TIMEOUT {
            bail!("Session stuck in phase {}", recorder.phase());
        }
        tokio::time::sleep(PHASE_POLL).await;
    }
    Ok(())
}

async fn run_script(recorder: &Recorder, steps: &[ScriptStep]) -> Result<()> {
    wait_for_format(recorder).await?;
    let control = recorder.control();

    for step in steps {
        info!(%step, "Script step");
        match *step {
            ScriptStep::Hold(duration) => {
                if let Err(e) = control.start_segment() {
                    warn!("Press rejected: {}", e);
                    continue;
                }
                tokio::time::sleep(duration).await;
                control.stop_segment();
                wait_for_idle(recorder).await?;
            }
            ScriptStep::Wait(duration) => tokio::time::sleep(duration).await,
            ScriptStep::Orient(orientation) => {
                if let Err(e) = control.set_orientation(orientation) {
                    warn!("Orientation change rejected: {}", e);
                }
            }
        }
    }
    wait_for_idle(recorder).await
}

async fn run_interactive(recorder: &Recorder) -> Result<()> {
    eprintln!("Commands: p = press, r = release, o <deg> = orientation, s = status, q = quit");
    let control = recorder.control();
    let status = ConsoleProgress::new(30);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Press) => {
                        if let Err(e) = control.start_segment() {
                            eprintln!("Cannot start recording: {}", e);
                        }
                    }
                    Ok(ConsoleCommand::Release) => {
                        control.stop_segment();
                    }
                    Ok(ConsoleCommand::Orient(orientation)) => {
                        if let Err(e) = control.set_orientation(orientation) {
                            eprintln!("{}", e);
                        }
                    }
                    Ok(ConsoleCommand::Status) => eprintln!("{}", status.render(&recorder.progress().snapshot())),
                    Ok(ConsoleCommand::Quit) => break,
                    Err(e) => eprintln!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    // Let a release or stitch that is already under way complete
    control.stop_segment();
    wait_for_idle(recorder).await
}

async fn print_events(mut events: UnboundedReceiver<RecorderEvent>, json: bool) {
    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Could not serialize event: {}", e),
            }
        } else {
            println!("{}", describe_event(&event));
        }
    }
}

/// One-line human description of an event
pub fn describe_event(event: &RecorderEvent) -> String {
    match event {
        RecorderEvent::FormatReady { format } => format!(
            "Encoder ready: {}x{} @ {} fps ({})",
            format.width,
            format.height,
            format.frame_rate,
            format.mime()
        ),
        RecorderEvent::SegmentOpened { path } => format!("Recording segment {}", path.display()),
        RecorderEvent::SegmentRejected { reason } => format!("Segment could not start: {}", reason),
        RecorderEvent::SegmentFinalized {
            length_us,
            recorded_us,
            ..
        } => format!(
            "Segment saved: {} (total {})",
            format_us(*length_us),
            format_us(*recorded_us as i64)
        ),
        RecorderEvent::StitchStarted { segments } => format!("Stitching {} segment(s)...", segments),
        RecorderEvent::StitchCompleted { report } => {
            format!("Saved {} ({})", report.output.display(), format_us(report.duration_us))
        }
        RecorderEvent::StitchFailed { reason } => format!("Stitching failed: {}", reason),
        RecorderEvent::DrainFailed { reason } => format!("Recording stopped: {}", reason),
    }
}

/// Execute the stitch command
pub fn stitch(args: StitchArgs, settings: RecorderSettings) -> Result<()> {
    if let Some(missing) = args.segments.iter().find(|p| !p.exists()) {
        bail!("Segment file does not exist: {}", missing.display());
    }

    let store = media_store(args.backend)?;
    let orientation = match args.orientation {
        Some(degrees) => Orientation::from_degrees(degrees)?,
        None => settings.output_orientation,
    };
    let out_dir = args.out_dir.clone().unwrap_or_else(|| settings.media_dir.clone());
    let library = MediaLibrary::new(out_dir, store.extension());

    info!(segments = args.segments.len(), "Stitching segments");
    let stitcher = Stitcher::new(store, library, Arc::new(TracingMediaIndex::new()), orientation)
        .keep_sources(args.keep_segments);
    let report = stitcher.stitch(&args.segments).context("Stitching failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_stitch_report(&report);
    }
    Ok(())
}

fn print_stitch_report(report: &StitchReport) {
    println!("Output:   {}", report.output.display());
    println!("Segments: {}", report.segments);
    println!("Samples:  {}", report.samples);
    println!("Duration: {}", format_us(report.duration_us));
    for (n, boundary) in report.boundaries_us.iter().enumerate() {
        println!("  segment {} starts at {}", n + 2, format_clock(*boundary));
    }
}

#[derive(Debug, Serialize)]
struct LibraryListing {
    root: PathBuf,
    outputs: Vec<MediaEntry>,
    stale_segments: Vec<MediaEntry>,
    purged: usize,
}

/// Execute the library command
pub fn library(args: LibraryArgs, settings: RecorderSettings) -> Result<()> {
    let root = args.media_dir.clone().unwrap_or(settings.media_dir);
    let library = MediaLibrary::new(&root, backend_extension(args.backend));

    let purged = if args.purge { library.purge_segments()? } else { 0 };
    let listing = LibraryListing {
        root,
        outputs: library.outputs()?,
        stale_segments: library.stale_segments()?,
        purged,
    };

    match args.format {
        ListFormat::Json => println!("{}", serde_json::to_string_pretty(&listing)?),
        ListFormat::Yaml => print!("{}", serde_yaml::to_string(&listing)?),
        ListFormat::Text => print_listing(&listing),
    }
    Ok(())
}

fn print_listing(listing: &LibraryListing) {
    println!("Media directory: {}", listing.root.display());
    println!("Videos ({}):", listing.outputs.len());
    for entry in &listing.outputs {
        println!("  {}  {} bytes", entry.path.display(), entry.size);
    }
    println!("Leftover segments ({}):", listing.stale_segments.len());
    for entry in &listing.stale_segments {
        println!("  {}  {} bytes", entry.path.display(), entry.size);
    }
    if listing.purged > 0 {
        println!("Purged {} segment file(s)", listing.purged);
    }
}

//! Session tests driving the drain loop and stitch worker step by step

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use holdrec::adapters::{Pacing, SyntheticEncoder, TraceMediaStore, TRACE_MIME};
use holdrec::config::RecorderSettings;
use holdrec::domain::errors::DomainError;
use holdrec::domain::model::{AccessUnit, Orientation, OutputSlot, Phase, SampleFlags, TrackFormat, VideoCodec};
use holdrec::engine::{assemble, DrainLoop, Pipeline, RecorderDeps, RecorderEvent, StepOutcome};
use holdrec::ports::{ContainerReader, ContainerWriter, EncoderEvent, MediaIndex, MediaStore, VideoEncoder};

// Test utilities

/// Media index that remembers every announcement
#[derive(Default)]
struct RecordingIndex {
    announced: Mutex<Vec<(PathBuf, String)>>,
}

impl RecordingIndex {
    fn announced(&self) -> Vec<(PathBuf, String)> {
        self.announced.lock().unwrap().clone()
    }
}

impl MediaIndex for RecordingIndex {
    fn notify(&self, path: &Path, mime_type: &str) {
        self.announced
            .lock()
            .unwrap()
            .push((path.to_path_buf(), mime_type.to_string()));
    }
}

/// Encoder that replays a fixed list of events and then times out
struct ScriptedEncoder {
    events: VecDeque<Result<EncoderEvent, DomainError>>,
    released: Arc<AtomicUsize>,
}

impl ScriptedEncoder {
    fn new(events: Vec<Result<EncoderEvent, DomainError>>) -> (Self, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        (
            Self {
                events: events.into(),
                released: Arc::clone(&released),
            },
            released,
        )
    }
}

impl VideoEncoder for ScriptedEncoder {
    fn poll(&mut self, _timeout: Duration) -> Result<EncoderEvent, DomainError> {
        self.events.pop_front().unwrap_or(Ok(EncoderEvent::Timeout))
    }

    fn release_output(&mut self, _unit: AccessUnit) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

fn track_format() -> TrackFormat {
    TrackFormat::video(VideoCodec::Raw, 16, 16, 100).unwrap()
}

fn media(n: usize, pts_us: i64) -> Result<EncoderEvent, DomainError> {
    Ok(EncoderEvent::Unit(AccessUnit {
        slot: OutputSlot(n % 4),
        payload: vec![n as u8; 16],
        pts_us,
        flags: SampleFlags::KEY_FRAME,
    }))
}

fn codec_config() -> Result<EncoderEvent, DomainError> {
    Ok(EncoderEvent::Unit(AccessUnit {
        slot: OutputSlot(0),
        payload: vec![0, 0, 0, 1],
        pts_us: 0,
        flags: SampleFlags::CODEC_CONFIG,
    }))
}

fn settings(dir: &TempDir, cap_ms: u64) -> RecorderSettings {
    RecorderSettings {
        cap_ms,
        media_dir: dir.path().join("media"),
        ..RecorderSettings::default()
    }
}

fn pipeline<E: VideoEncoder>(
    dir: &TempDir,
    cap_ms: u64,
    encoder: E,
) -> (Pipeline<E>, Arc<RecordingIndex>) {
    let index = Arc::new(RecordingIndex::default());
    let deps = RecorderDeps {
        store: Arc::new(TraceMediaStore::new()),
        index: index.clone(),
    };
    (assemble(&settings(dir, cap_ms), encoder, deps).unwrap(), index)
}

fn step_n<E: VideoEncoder>(drain: &mut DrainLoop<E>, n: usize) {
    for _ in 0..n {
        assert_eq!(drain.step().unwrap(), StepOutcome::Continue);
    }
}

fn drain_events(events: &mut UnboundedReceiver<RecorderEvent>) -> Vec<RecorderEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn read_timestamps(path: &Path) -> Vec<i64> {
    let mut reader = TraceMediaStore::new().open_reader(path).unwrap();
    reader.select_track(0).unwrap();
    let mut buf = Vec::new();
    let mut timestamps = Vec::new();
    while let Some(meta) = reader.read_sample(&mut buf).unwrap() {
        timestamps.push(meta.timestamp_us);
    }
    timestamps
}

/// Per-path call counts for segment writers
#[derive(Default)]
struct WriterCalls {
    created: HashMap<PathBuf, usize>,
    stopped: HashMap<PathBuf, usize>,
}

/// Trace store that counts how often each segment writer is created and stopped
#[derive(Default)]
struct CountingStore {
    inner: TraceMediaStore,
    calls: Arc<Mutex<WriterCalls>>,
}

fn is_segment(path: &Path) -> bool {
    path.file_name()
        .map_or(false, |name| name.to_string_lossy().starts_with("segment_"))
}

impl MediaStore for CountingStore {
    fn create_writer(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, DomainError> {
        let writer = self.inner.create_writer(path)?;
        if !is_segment(path) {
            return Ok(writer);
        }
        *self.calls.lock().unwrap().created.entry(path.to_path_buf()).or_default() += 1;
        Ok(Box::new(CountingWriter {
            inner: writer,
            path: path.to_path_buf(),
            calls: Arc::clone(&self.calls),
        }))
    }

    fn open_reader(&self, path: &Path) -> Result<Box<dyn ContainerReader>, DomainError> {
        self.inner.open_reader(path)
    }

    fn extension(&self) -> &'static str {
        self.inner.extension()
    }

    fn mime_type(&self) -> &'static str {
        self.inner.mime_type()
    }
}

struct CountingWriter {
    inner: Box<dyn ContainerWriter>,
    path: PathBuf,
    calls: Arc<Mutex<WriterCalls>>,
}

impl ContainerWriter for CountingWriter {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, DomainError> {
        self.inner.add_track(format)
    }

    fn set_orientation_hint(&mut self, orientation: Orientation) -> Result<(), DomainError> {
        self.inner.set_orientation_hint(orientation)
    }

    fn start(&mut self) -> Result<(), DomainError> {
        self.inner.start()
    }

    fn write_sample(
        &mut self,
        track: usize,
        payload: &[u8],
        timestamp_us: i64,
        flags: SampleFlags,
    ) -> Result<(), DomainError> {
        self.inner.write_sample(track, payload, timestamp_us, flags)
    }

    fn stop(&mut self) -> Result<(), DomainError> {
        *self.calls.lock().unwrap().stopped.entry(self.path.clone()).or_default() += 1;
        self.inner.stop()
    }

    fn release(&mut self) {
        self.inner.release()
    }
}

/// Small deterministic generator for operation sweeps
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

// Full session

#[test]
fn test_two_holds_reach_cap_and_stitch() {
    let dir = TempDir::new().unwrap();
    let encoder = SyntheticEncoder::new(track_format(), Pacing::Virtual);
    let (pipeline, index) = pipeline(&dir, 6_000, encoder);
    let Pipeline {
        control,
        mut drain,
        stitch_worker,
        mut events,
        ..
    } = pipeline;

    // Warm-up
    step_n(&mut drain, 1);
    assert!(control.state().format_ready());

    // First hold: 251 frames at 100 fps
    control.start_segment().unwrap();
    step_n(&mut drain, 250);
    assert!(control.stop_segment());
    step_n(&mut drain, 1);
    assert_eq!(control.state().phase(), Phase::Idle);
    assert_eq!(control.state().recorded_us(), 2_500_000);
    assert_eq!(drain.segments().len(), 1);

    // Released: frames keep coming but are not recorded
    step_n(&mut drain, 5);
    assert_eq!(control.state().recorded_us(), 2_500_000);

    // Second hold runs into the cap
    control.start_segment().unwrap();
    let mut guard = 0;
    while control.state().phase() == Phase::Recording {
        step_n(&mut drain, 1);
        guard += 1;
        assert!(guard < 1_000, "cap never reached");
    }
    assert_eq!(control.state().phase(), Phase::Stitching);
    assert_eq!(control.state().recorded_us(), 6_000_000);
    assert!(drain.segments().is_empty());

    let report = stitch_worker.process_next(Duration::from_secs(5)).unwrap().unwrap();
    assert_eq!(report.segments, 2);
    assert_eq!(report.samples, 251 + 351);
    assert_eq!(report.boundaries_us, vec![2_510_000]);
    assert_eq!(report.duration_us, 6_020_000);
    assert!(report.output.exists());

    // Session closed out
    assert_eq!(control.state().phase(), Phase::Idle);
    assert_eq!(control.state().recorded_us(), 0);
    assert_eq!(index.announced(), vec![(report.output.clone(), TRACE_MIME.to_string())]);

    // Continuous timeline across the boundary
    let timestamps = read_timestamps(&report.output);
    assert_eq!(timestamps.len(), 602);
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(timestamps[251], 2_510_000);

    // Only the stitched file is left
    let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("media"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(leftovers, vec![report.output.clone()]);

    // Every unit went back to the encoder
    let stats = drain.encoder().stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.produced, stats.released);

    let events = drain_events(&mut events);
    assert!(matches!(events.first(), Some(RecorderEvent::FormatReady { .. })));
    let finalized = events
        .iter()
        .filter(|e| matches!(e, RecorderEvent::SegmentFinalized { .. }))
        .count();
    assert_eq!(finalized, 2);
    assert!(events.contains(&RecorderEvent::StitchStarted { segments: 2 }));
    assert!(matches!(events.last(), Some(RecorderEvent::StitchCompleted { .. })));
}

#[test]
fn test_segment_timestamps_start_at_zero() {
    let dir = TempDir::new().unwrap();
    let (encoder, released) = ScriptedEncoder::new(vec![
        Ok(EncoderEvent::FormatChanged(track_format())),
        media(0, 1_000_000),
        codec_config(),
        media(1, 1_010_000),
        media(2, 1_020_000),
    ]);
    let (pipeline, _) = pipeline(&dir, 6_000, encoder);
    let Pipeline { control, mut drain, .. } = pipeline;

    step_n(&mut drain, 1);
    control.start_segment().unwrap();
    step_n(&mut drain, 3);
    control.stop_segment();
    step_n(&mut drain, 1);

    assert_eq!(control.state().phase(), Phase::Idle);
    assert_eq!(released.load(Ordering::SeqCst), 4);
    assert_eq!(read_timestamps(&drain.segments()[0]), vec![0, 10_000, 20_000]);
}

// Edge cases

#[test]
fn test_start_before_format_is_not_ready() {
    let dir = TempDir::new().unwrap();
    let (encoder, _) = ScriptedEncoder::new(vec![]);
    let (pipeline, _) = pipeline(&dir, 6_000, encoder);

    let err = pipeline.control.start_segment().unwrap_err();
    assert!(matches!(err, DomainError::NotReady(_)));
    assert_eq!(pipeline.control.state().phase(), Phase::Idle);
}

#[test]
fn test_tap_release_finalizes_on_timeout() {
    let dir = TempDir::new().unwrap();
    let (encoder, _) = ScriptedEncoder::new(vec![Ok(EncoderEvent::FormatChanged(track_format()))]);
    let (pipeline, _) = pipeline(&dir, 6_000, encoder);
    let Pipeline {
        control,
        mut drain,
        mut events,
        ..
    } = pipeline;

    step_n(&mut drain, 1);
    control.start_segment().unwrap();
    assert!(control.stop_segment());
    assert_eq!(control.state().phase(), Phase::Finishing);

    // Opens the writer, then the encoder has nothing more to give
    step_n(&mut drain, 1);
    assert_eq!(control.state().phase(), Phase::Idle);
    assert_eq!(control.state().recorded_us(), 0);

    let finalized: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            RecorderEvent::SegmentFinalized { length_us, samples, .. } => Some((length_us, samples)),
            _ => None,
        })
        .collect();
    assert_eq!(finalized, vec![(0, 0)]);
    assert!(read_timestamps(&drain.segments()[0]).is_empty());
}

#[test]
fn test_stop_outside_recording_is_ignored() {
    let dir = TempDir::new().unwrap();
    let (encoder, _) = ScriptedEncoder::new(vec![Ok(EncoderEvent::FormatChanged(track_format()))]);
    let (pipeline, _) = pipeline(&dir, 6_000, encoder);

    assert!(!pipeline.control.stop_segment());
    assert_eq!(pipeline.control.state().phase(), Phase::Idle);
}

#[test]
fn test_orientation_refused_while_capturing() {
    let dir = TempDir::new().unwrap();
    let (encoder, _) = ScriptedEncoder::new(vec![
        Ok(EncoderEvent::FormatChanged(track_format())),
        media(0, 0),
    ]);
    let (pipeline, _) = pipeline(&dir, 6_000, encoder);
    let Pipeline { control, mut drain, .. } = pipeline;
    let portrait = Orientation::PORTRAIT;

    step_n(&mut drain, 1);
    control.start_segment().unwrap();
    assert!(matches!(control.set_orientation(portrait), Err(DomainError::Busy(_))));

    step_n(&mut drain, 1);
    control.stop_segment();
    step_n(&mut drain, 1);
    assert_eq!(control.state().phase(), Phase::Idle);

    control.set_orientation(portrait).unwrap();
    assert_eq!(control.orientation(), portrait);
}

#[test]
fn test_only_one_concurrent_press_wins() {
    let dir = TempDir::new().unwrap();
    let (encoder, _) = ScriptedEncoder::new(vec![Ok(EncoderEvent::FormatChanged(track_format()))]);
    let (pipeline, _) = pipeline(&dir, 6_000, encoder);
    let Pipeline { control, mut drain, .. } = pipeline;
    step_n(&mut drain, 1);

    let winners = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| control.start_segment().is_ok())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count()
    });

    assert_eq!(winners, 1);
    assert_eq!(control.state().phase(), Phase::Recording);
}

// Failures

#[test]
fn test_encoder_failure_resets_session() {
    let dir = TempDir::new().unwrap();
    let (encoder, released) = ScriptedEncoder::new(vec![
        Ok(EncoderEvent::FormatChanged(track_format())),
        media(0, 0),
        media(1, 10_000),
        Err(DomainError::EncoderFail("codec reset".to_string())),
    ]);
    let (pipeline, _) = pipeline(&dir, 6_000, encoder);
    let Pipeline {
        control,
        mut drain,
        mut events,
        ..
    } = pipeline;

    step_n(&mut drain, 1);
    control.start_segment().unwrap();
    let report = drain.run();

    assert!(matches!(report.error, Some(DomainError::EncoderFail(_))));
    assert_eq!(control.state().phase(), Phase::Idle);
    assert_eq!(control.state().recorded_us(), 0);
    assert!(!control.state().format_ready());
    assert_eq!(released.load(Ordering::SeqCst), 2);

    // The in-flight segment was still closed properly
    assert_eq!(report.pending_segments.len(), 1);
    assert_eq!(read_timestamps(&report.pending_segments[0]), vec![0, 10_000]);

    let events = drain_events(&mut events);
    assert!(matches!(events.last(), Some(RecorderEvent::DrainFailed { .. })));
}

#[test]
fn test_stitch_failure_still_returns_to_idle() {
    let dir = TempDir::new().unwrap();
    let mut script = vec![Ok(EncoderEvent::FormatChanged(track_format()))];
    script.extend((0..=100).map(|n| media(n, n as i64 * 10_000)));
    let (encoder, _) = ScriptedEncoder::new(script);
    let (pipeline, index) = pipeline(&dir, 1_000, encoder);
    let Pipeline {
        control,
        mut drain,
        stitch_worker,
        mut events,
        ..
    } = pipeline;

    step_n(&mut drain, 1);
    control.start_segment().unwrap();
    let segment = {
        step_n(&mut drain, 1);
        drain.segments()[0].clone()
    };
    step_n(&mut drain, 100);
    assert_eq!(control.state().phase(), Phase::Stitching);

    std::fs::remove_file(&segment).unwrap();
    let result = stitch_worker.process_next(Duration::from_secs(5)).unwrap();
    assert!(matches!(result, Err(DomainError::FileNotFound(_))));

    assert_eq!(control.state().phase(), Phase::Idle);
    assert_eq!(control.state().recorded_us(), 0);
    assert!(index.announced().is_empty());
    assert!(matches!(
        drain_events(&mut events).last(),
        Some(RecorderEvent::StitchFailed { .. })
    ));
}

#[test]
fn test_missing_stitch_worker_discards_segments() {
    let dir = TempDir::new().unwrap();
    let mut script = vec![Ok(EncoderEvent::FormatChanged(track_format()))];
    script.extend((0..=10).map(|n| media(n, n as i64 * 10_000)));
    let (encoder, _) = ScriptedEncoder::new(script);
    let (pipeline, _) = pipeline(&dir, 100, encoder);
    let Pipeline {
        control,
        mut drain,
        stitch_worker,
        mut events,
        ..
    } = pipeline;
    drop(stitch_worker);

    step_n(&mut drain, 1);
    control.start_segment().unwrap();
    step_n(&mut drain, 11);

    assert_eq!(control.state().phase(), Phase::Idle);
    assert_eq!(control.state().recorded_us(), 0);
    assert_eq!(std::fs::read_dir(dir.path().join("media")).unwrap().count(), 0);
    assert!(matches!(
        drain_events(&mut events).last(),
        Some(RecorderEvent::StitchFailed { .. })
    ));
}

#[test]
fn test_shutdown_command_stops_loop() {
    let dir = TempDir::new().unwrap();
    let encoder = SyntheticEncoder::new(track_format(), Pacing::RealTime);
    let deps = RecorderDeps {
        store: Arc::new(TraceMediaStore::new()),
        index: Arc::new(RecordingIndex::default()),
    };
    let (recorder, _events) = holdrec::Recorder::spawn(&settings(&dir, 6_000), encoder, deps).unwrap();

    let mut waited = 0;
    while !recorder.control().state().format_ready() {
        std::thread::sleep(Duration::from_millis(5));
        waited += 1;
        assert!(waited < 1_000, "encoder never became ready");
    }
    recorder.control().start_segment().unwrap();
    std::thread::sleep(Duration::from_millis(100));

    // Shutting down mid-segment leaves a finalized, unstitched file
    let report = recorder.shutdown();
    assert!(report.drain_error.is_none());
    assert_eq!(report.unstitched.len(), 1);
    assert!(!read_timestamps(&report.unstitched[0]).is_empty());
}

#[test]
fn test_stitch_worker_continues_after_failed_job() {
    let dir = TempDir::new().unwrap();
    let encoder = SyntheticEncoder::new(track_format(), Pacing::Virtual);
    let (pipeline, _) = pipeline(&dir, 100, encoder);
    let Pipeline {
        control,
        mut drain,
        stitch_worker,
        mut events,
        ..
    } = pipeline;
    let worker = std::thread::spawn(move || stitch_worker.run());

    let wait_idle = |control: &holdrec::SessionControl| {
        let mut waited = 0;
        while control.state().phase() != Phase::Idle {
            std::thread::sleep(Duration::from_millis(5));
            waited += 1;
            assert!(waited < 1_000, "session never returned to idle");
        }
    };
    let record_to_cap = |drain: &mut DrainLoop<SyntheticEncoder>, control: &holdrec::SessionControl| {
        let mut guard = 0;
        while control.state().phase() == Phase::Recording {
            step_n(drain, 1);
            guard += 1;
            assert!(guard < 1_000, "cap never reached");
        }
    };

    step_n(&mut drain, 1);

    // First session loses its segment file before the merge
    control.start_segment().unwrap();
    step_n(&mut drain, 1);
    std::fs::remove_file(&drain.segments()[0]).unwrap();
    record_to_cap(&mut drain, &control);
    wait_idle(&control);

    // Second session is merged normally by the same worker
    control.start_segment().unwrap();
    record_to_cap(&mut drain, &control);
    wait_idle(&control);

    drop(drain);
    worker.join().unwrap();

    let outcomes: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, RecorderEvent::StitchFailed { .. } | RecorderEvent::StitchCompleted { .. }))
        .collect();
    assert_eq!(outcomes.len(), 2);
    assert!(matches!(outcomes[0], RecorderEvent::StitchFailed { .. }));
    assert!(matches!(outcomes[1], RecorderEvent::StitchCompleted { .. }));
}

// Sweeps

#[test]
fn test_random_press_release_sequences_open_and_close_each_segment_once() {
    for seed in 1..=20u64 {
        let dir = TempDir::new().unwrap();
        let store = CountingStore::default();
        let calls = Arc::clone(&store.calls);
        let deps = RecorderDeps {
            store: Arc::new(store),
            index: Arc::new(RecordingIndex::default()),
        };
        let encoder = SyntheticEncoder::new(track_format(), Pacing::Virtual);
        let Pipeline {
            control,
            mut drain,
            stitch_worker,
            ..
        } = assemble(&settings(&dir, 300), encoder, deps).unwrap();

        let mut rng = XorShift(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let mut accepted = 0;
        let mut last_recorded = 0;
        step_n(&mut drain, 1);

        for _ in 0..300 {
            match rng.next() % 4 {
                0 => {
                    if control.start_segment().is_ok() {
                        accepted += 1;
                    }
                }
                1 => {
                    control.stop_segment();
                }
                _ => step_n(&mut drain, 1),
            }
            if control.state().phase() == Phase::Stitching {
                stitch_worker.process_next(Duration::from_secs(5)).unwrap().unwrap();
            }

            match control.state().phase() {
                Phase::Recording | Phase::Finishing => {
                    let recorded = control.state().recorded_us();
                    assert!(recorded >= last_recorded, "seed {}: recorded time went backwards", seed);
                    assert!(recorded <= control.state().cap_us() + 10_000, "seed {}: overshoot", seed);
                    last_recorded = recorded;
                }
                Phase::Idle => last_recorded = control.state().recorded_us(),
                Phase::Stitching => {}
            }
        }

        // Close out whatever is still in flight
        control.stop_segment();
        let mut guard = 0;
        while control.state().phase() != Phase::Idle {
            if control.state().phase() == Phase::Stitching {
                stitch_worker.process_next(Duration::from_secs(5)).unwrap().unwrap();
            } else {
                step_n(&mut drain, 1);
            }
            guard += 1;
            assert!(guard < 1_000, "seed {}: session never settled", seed);
        }

        let calls = calls.lock().unwrap();
        assert_eq!(calls.created.len(), accepted, "seed {}", seed);
        assert!(calls.created.values().all(|n| *n == 1), "seed {}", seed);
        assert_eq!(calls.stopped.len(), accepted, "seed {}", seed);
        assert!(calls.stopped.values().all(|n| *n == 1), "seed {}", seed);
    }
}

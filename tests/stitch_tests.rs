//! Stitcher tests over trace containers

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use holdrec::adapters::{TraceMediaStore, TraceReader, TracingMediaIndex};
use holdrec::domain::errors::DomainError;
use holdrec::domain::model::{Orientation, SampleFlags, TrackFormat, VideoCodec};
use holdrec::engine::Stitcher;
use holdrec::output::{MediaKind, MediaLibrary};
use holdrec::ports::{ContainerReader, MediaStore};

// Test utilities

fn format() -> TrackFormat {
    TrackFormat::video(VideoCodec::Raw, 16, 16, 100).unwrap()
}

/// Write a finalized segment holding `timestamps`
fn write_segment(dir: &Path, name: &str, timestamps: &[i64]) -> PathBuf {
    let path = dir.join(format!("segment_{}.vtrace", name));
    let mut writer = TraceMediaStore::new().create_writer(&path).unwrap();
    let track = writer.add_track(&format()).unwrap();
    writer.start().unwrap();
    for (n, ts) in timestamps.iter().enumerate() {
        writer
            .write_sample(track, &[n as u8; 8], *ts, SampleFlags::KEY_FRAME)
            .unwrap();
    }
    writer.stop().unwrap();
    writer.release();
    path
}

fn frames(count: i64) -> Vec<i64> {
    (0..count).map(|n| n * 10_000).collect()
}

fn stitcher(root: &Path) -> Stitcher {
    Stitcher::new(
        Arc::new(TraceMediaStore::new()),
        MediaLibrary::new(root, "vtrace"),
        Arc::new(TracingMediaIndex::new()),
        Orientation::PORTRAIT,
    )
}

fn samples(path: &Path) -> Vec<(i64, Vec<u8>)> {
    let mut reader = TraceReader::open(path).unwrap();
    reader.select_track(0).unwrap();
    let mut buf = Vec::new();
    let mut out = Vec::new();
    while let Some(meta) = reader.read_sample(&mut buf).unwrap() {
        out.push((meta.timestamp_us, buf[..meta.size].to_vec()));
    }
    out
}

// Merging

#[test]
fn test_boundaries_are_prefix_sums_of_durations() {
    let dir = TempDir::new().unwrap();
    let segments = vec![
        write_segment(dir.path(), "a", &frames(5)),
        write_segment(dir.path(), "b", &frames(3)),
        write_segment(dir.path(), "c", &frames(2)),
    ];
    let out_dir = dir.path().join("out");

    let report = stitcher(&out_dir).stitch(&segments).unwrap();

    assert_eq!(report.segments, 3);
    assert_eq!(report.samples, 10);
    assert_eq!(report.boundaries_us, vec![50_000, 80_000]);
    assert_eq!(report.duration_us, 100_000);

    let merged = samples(&report.output);
    let timestamps: Vec<i64> = merged.iter().map(|(ts, _)| *ts).collect();
    assert_eq!(
        timestamps,
        vec![0, 10_000, 20_000, 30_000, 40_000, 50_000, 60_000, 70_000, 80_000, 90_000]
    );
    // Payloads are copied unchanged, in order
    assert_eq!(merged[5].1, vec![0u8; 8]);
    assert_eq!(merged[9].1, vec![1u8; 8]);
}

#[test]
fn test_output_carries_orientation_and_open_ended_track() {
    let dir = TempDir::new().unwrap();
    let segments = vec![write_segment(dir.path(), "a", &frames(4))];

    let report = stitcher(dir.path()).stitch(&segments).unwrap();
    let reader = TraceReader::open(&report.output).unwrap();

    assert_eq!(reader.orientation(), Orientation::PORTRAIT);
    assert_eq!(reader.track_count(), 1);
    assert_eq!(reader.track_format(0).unwrap().duration_us, Some(40_000));
}

#[test]
fn test_overlapping_timestamps_stay_strictly_increasing() {
    let dir = TempDir::new().unwrap();
    // Claims 10 ms but holds samples past that
    let long_tail = dir.path().join("segment_tail.vtrace");
    std::fs::write(
        &long_tail,
        concat!(
            "{\"kind\":\"header\",\"version\":1,\"orientation\":0,\"tracks\":[",
            "{\"codec\":\"raw\",\"width\":16,\"height\":16,\"frame_rate\":100,\"bit_rate\":0}]}\n",
            "{\"kind\":\"sample\",\"track\":0,\"ts_us\":0,\"flags\":1,\"payload\":[1]}\n",
            "{\"kind\":\"sample\",\"track\":0,\"ts_us\":30000,\"flags\":1,\"payload\":[2]}\n",
            "{\"kind\":\"trailer\",\"samples\":2,\"duration_us\":10000}\n",
        ),
    )
    .unwrap();
    let segments = vec![long_tail, write_segment(dir.path(), "b", &frames(2))];

    let report = stitcher(dir.path()).stitch(&segments).unwrap();
    let timestamps: Vec<i64> = samples(&report.output).iter().map(|(ts, _)| *ts).collect();

    assert_eq!(timestamps, vec![0, 30_000, 30_001, 30_002]);
    assert_eq!(report.boundaries_us, vec![10_000]);
}

#[test]
fn test_segment_without_track_is_skipped() {
    let dir = TempDir::new().unwrap();
    let empty = dir.path().join("segment_empty.vtrace");
    std::fs::write(
        &empty,
        "{\"kind\":\"header\",\"version\":1,\"orientation\":0,\"tracks\":[]}\n\
         {\"kind\":\"trailer\",\"samples\":0,\"duration_us\":0}\n",
    )
    .unwrap();
    let segments = vec![
        write_segment(dir.path(), "a", &frames(2)),
        empty,
        write_segment(dir.path(), "b", &frames(2)),
    ];

    let report = stitcher(dir.path()).stitch(&segments).unwrap();

    assert_eq!(report.segments, 2);
    assert_eq!(report.boundaries_us, vec![20_000]);
    assert_eq!(report.duration_us, 40_000);
}

// Cleanup

#[test]
fn test_sources_deleted_after_success() {
    let dir = TempDir::new().unwrap();
    let segments = vec![
        write_segment(dir.path(), "a", &frames(2)),
        write_segment(dir.path(), "b", &frames(2)),
    ];

    let report = stitcher(dir.path()).stitch(&segments).unwrap();

    assert!(segments.iter().all(|p| !p.exists()));
    let library = MediaLibrary::new(dir.path(), "vtrace");
    let outputs = library.outputs().unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].path, report.output);
    assert_eq!(outputs[0].kind, MediaKind::Output);
}

#[test]
fn test_keep_sources() {
    let dir = TempDir::new().unwrap();
    let segments = vec![write_segment(dir.path(), "a", &frames(2))];

    stitcher(dir.path()).keep_sources(true).stitch(&segments).unwrap();

    assert!(segments[0].exists());
}

#[test]
fn test_failure_leaves_no_partial_output() {
    let dir = TempDir::new().unwrap();
    let unfinished = dir.path().join("segment_unfinished.vtrace");
    let mut writer = TraceMediaStore::new().create_writer(&unfinished).unwrap();
    writer.add_track(&format()).unwrap();
    writer.start().unwrap();
    writer.write_sample(0, &[1], 0, SampleFlags::KEY_FRAME).unwrap();
    writer.release();

    let segments = vec![write_segment(dir.path(), "a", &frames(3)), unfinished];
    let out_dir = dir.path().join("out");

    let err = stitcher(&out_dir).stitch(&segments).unwrap_err();

    assert!(matches!(err, DomainError::DemuxFail(_)));
    // Sources are consumed either way
    assert!(segments.iter().all(|p| !p.exists()));
    // Neither a finished nor a temporary file remains
    assert_eq!(std::fs::read_dir(&out_dir).unwrap().count(), 0);
}

#[test]
fn test_all_segments_without_track_is_an_error() {
    let dir = TempDir::new().unwrap();
    let empty = dir.path().join("segment_empty.vtrace");
    std::fs::write(
        &empty,
        "{\"kind\":\"header\",\"version\":1,\"orientation\":0,\"tracks\":[]}\n\
         {\"kind\":\"trailer\",\"samples\":0,\"duration_us\":0}\n",
    )
    .unwrap();

    let err = stitcher(dir.path()).stitch(&[empty]).unwrap_err();
    assert!(matches!(err, DomainError::DemuxFail(_)));
}

#[test]
fn test_no_segments_is_bad_args() {
    let dir = TempDir::new().unwrap();
    let err = stitcher(dir.path()).stitch(&[]).unwrap_err();
    assert!(matches!(err, DomainError::BadArgs(_)));
}

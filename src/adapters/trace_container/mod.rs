//! Line-delimited JSON container used when no codec library is wanted
//!
//! A trace file starts with a header record listing its tracks, holds one
//! record per sample, and ends with a trailer written by `stop`. A file
//! without a trailer was never finalized and cannot be opened for reading.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::domain::errors::DomainError;
use crate::domain::model::{Orientation, SampleFlags, SampleMeta, TrackFormat};
use crate::ports::{ContainerReader, ContainerWriter, MediaStore};

pub const TRACE_EXTENSION: &str = "vtrace";
pub const TRACE_MIME: &str = "application/x-holdrec-trace";
const TRACE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum TraceRecord {
    Header {
        version: u32,
        orientation: Orientation,
        tracks: Vec<TrackFormat>,
    },
    Sample {
        track: usize,
        ts_us: i64,
        flags: SampleFlags,
        payload: Vec<u8>,
    },
    Trailer {
        samples: u64,
        duration_us: i64,
    },
}

/// Factory for trace writers and readers
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceMediaStore;

impl TraceMediaStore {
    pub fn new() -> Self {
        Self
    }
}

impl MediaStore for TraceMediaStore {
    fn create_writer(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, DomainError> {
        Ok(Box::new(TraceWriter::create(path)?))
    }

    fn open_reader(&self, path: &Path) -> Result<Box<dyn ContainerReader>, DomainError> {
        Ok(Box::new(TraceReader::open(path)?))
    }

    fn extension(&self) -> &'static str {
        TRACE_EXTENSION
    }

    fn mime_type(&self) -> &'static str {
        TRACE_MIME
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Configuring,
    Started,
    Stopped,
}

/// Writes one trace file
pub struct TraceWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    state: WriterState,
    orientation: Orientation,
    track: Option<TrackFormat>,
    samples: u64,
    last_ts: Option<i64>,
}

impl TraceWriter {
    pub fn create(path: &Path) -> Result<Self, DomainError> {
        let file = File::create(path)
            .map_err(|e| DomainError::FsFail(format!("Failed to create {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Created trace container");
        Ok(Self {
            path: path.to_path_buf(),
            out: Some(BufWriter::new(file)),
            state: WriterState::Configuring,
            orientation: Orientation::UPRIGHT,
            track: None,
            samples: 0,
            last_ts: None,
        })
    }

    fn emit(&mut self, record: &TraceRecord) -> Result<(), DomainError> {
        let path = &self.path;
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| DomainError::MuxFail(format!("Writer for {} was released", path.display())))?;
        serde_json::to_writer(&mut *out, record)
            .map_err(|e| DomainError::MuxFail(format!("Failed to encode record: {}", e)))?;
        out.write_all(b"\n")
            .map_err(|e| DomainError::FsFail(format!("Failed to write {}: {}", path.display(), e)))
    }

    fn duration_us(&self) -> i64 {
        match (self.last_ts, &self.track) {
            (Some(last), Some(format)) => last + format.frame_interval_us(),
            _ => 0,
        }
    }
}

impl ContainerWriter for TraceWriter {
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, DomainError> {
        if self.state != WriterState::Configuring {
            return Err(DomainError::MuxFail("Tracks must be added before start".to_string()));
        }
        if self.track.is_some() {
            return Err(DomainError::MuxFail("Trace container holds a single video track".to_string()));
        }
        self.track = Some(format.clone());
        Ok(0)
    }

    fn set_orientation_hint(&mut self, orientation: Orientation) -> Result<(), DomainError> {
        if self.state != WriterState::Configuring {
            return Err(DomainError::MuxFail("Orientation must be set before start".to_string()));
        }
        self.orientation = orientation;
        Ok(())
    }

    fn start(&mut self) -> Result<(), DomainError> {
        if self.state != WriterState::Configuring {
            return Err(DomainError::MuxFail("Writer already started".to_string()));
        }
        let track = self
            .track
            .clone()
            .ok_or_else(|| DomainError::MuxFail("No track added before start".to_string()))?;
        self.emit(&TraceRecord::Header {
            version: TRACE_VERSION,
            orientation: self.orientation,
            tracks: vec![track],
        })?;
        self.state = WriterState::Started;
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: usize,
        payload: &[u8],
        timestamp_us: i64,
        flags: SampleFlags,
    ) -> Result<(), DomainError> {
        if self.state != WriterState::Started {
            return Err(DomainError::MuxFail("Writer is not started".to_string()));
        }
        if track != 0 {
            return Err(DomainError::MuxFail(format!("Unknown track {}", track)));
        }
        if let Some(last) = self.last_ts {
            if timestamp_us < last {
                return Err(DomainError::MuxFail(format!(
                    "Timestamp {} goes backwards (last {})",
                    timestamp_us, last
                )));
            }
        }
        self.emit(&TraceRecord::Sample {
            track,
            ts_us: timestamp_us,
            flags,
            payload: payload.to_vec(),
        })?;
        self.last_ts = Some(timestamp_us);
        self.samples += 1;
        trace!(size = payload.len(), ts_us = timestamp_us, "Trace sample written");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DomainError> {
        match self.state {
            WriterState::Stopped => Ok(()),
            WriterState::Configuring => Err(DomainError::MuxFail("Writer was never started".to_string())),
            WriterState::Started => {
                let trailer = TraceRecord::Trailer {
                    samples: self.samples,
                    duration_us: self.duration_us(),
                };
                self.emit(&trailer)?;
                if let Some(out) = self.out.as_mut() {
                    out.flush()
                        .map_err(|e| DomainError::FsFail(format!("Failed to flush {}: {}", self.path.display(), e)))?;
                }
                self.state = WriterState::Stopped;
                debug!(path = %self.path.display(), samples = self.samples, "Trace container finalized");
                Ok(())
            }
        }
    }

    fn release(&mut self) {
        self.out = None;
    }
}

/// Reads a finalized trace file
pub struct TraceReader {
    path: PathBuf,
    tracks: Vec<TrackFormat>,
    orientation: Orientation,
    samples: Vec<(usize, SampleMeta, Vec<u8>)>,
    cursor: usize,
    selected: Option<usize>,
}

impl TraceReader {
    pub fn open(path: &Path) -> Result<Self, DomainError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DomainError::FileNotFound(path.display().to_string()),
            _ => DomainError::DemuxFail(format!("Failed to open {}: {}", path.display(), e)),
        })?;

        let mut header: Option<(Orientation, Vec<TrackFormat>)> = None;
        let mut trailer: Option<i64> = None;
        let mut samples = Vec::new();

        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| DomainError::DemuxFail(format!("Failed to read {}: {}", path.display(), e)))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: TraceRecord = serde_json::from_str(&line).map_err(|e| {
                DomainError::DemuxFail(format!("{}:{}: malformed record: {}", path.display(), number + 1, e))
            })?;
            match record {
                TraceRecord::Header { version, orientation, tracks } => {
                    if version != TRACE_VERSION {
                        return Err(DomainError::DemuxFail(format!("Unsupported trace version {}", version)));
                    }
                    header = Some((orientation, tracks));
                }
                TraceRecord::Sample {
                    track,
                    ts_us,
                    flags,
                    payload,
                } => {
                    let meta = SampleMeta {
                        size: payload.len(),
                        timestamp_us: ts_us,
                        flags,
                    };
                    samples.push((track, meta, payload));
                }
                TraceRecord::Trailer { duration_us, .. } => trailer = Some(duration_us),
            }
        }

        let (orientation, tracks) =
            header.ok_or_else(|| DomainError::DemuxFail(format!("{} has no header", path.display())))?;
        let duration_us =
            trailer.ok_or_else(|| DomainError::DemuxFail(format!("{} was not finalized", path.display())))?;

        Ok(Self {
            path: path.to_path_buf(),
            tracks: tracks.into_iter().map(|t| t.with_duration_us(duration_us)).collect(),
            orientation,
            samples,
            cursor: 0,
            selected: None,
        })
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }
}

impl ContainerReader for TraceReader {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, index: usize) -> Result<TrackFormat, DomainError> {
        self.tracks
            .get(index)
            .cloned()
            .ok_or_else(|| DomainError::DemuxFail(format!("{} has no track {}", self.path.display(), index)))
    }

    fn select_track(&mut self, index: usize) -> Result<(), DomainError> {
        if index >= self.tracks.len() {
            return Err(DomainError::DemuxFail(format!("{} has no track {}", self.path.display(), index)));
        }
        self.selected = Some(index);
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<SampleMeta>, DomainError> {
        while let Some((track, meta, payload)) = self.samples.get(self.cursor) {
            self.cursor += 1;
            if self.selected.map_or(true, |selected| selected == *track) {
                buf.clear();
                buf.extend_from_slice(payload);
                return Ok(Some(*meta));
            }
        }
        Ok(None)
    }

    fn release(&mut self) {
        self.samples.clear();
        self.cursor = 0;
    }
}

// Ports - Interface definitions (contracts)

use std::path::Path;
use std::time::Duration;

use crate::domain::errors::*;
use crate::domain::model::*;

/// Outcome of one bounded wait on the encoder's output queue
#[derive(Debug)]
pub enum EncoderEvent {
    /// A compressed frame is ready
    Unit(AccessUnit),
    /// The output format became known (emitted once, before the first unit)
    FormatChanged(TrackFormat),
    /// Nothing arrived within the timeout
    Timeout,
}

/// Port for the video encoder's output side.
///
/// The raw-frame input side belongs to the capture source and is fed
/// independently of this trait.
pub trait VideoEncoder: Send {
    /// Wait up to `timeout` for the next output event
    fn poll(&mut self, timeout: Duration) -> Result<EncoderEvent, DomainError>;

    /// Hand an output buffer back to the encoder's pool
    fn release_output(&mut self, unit: AccessUnit);
}

/// Port for a container writer bound to one output file
pub trait ContainerWriter: Send {
    /// Register a track; must precede `start`
    fn add_track(&mut self, format: &TrackFormat) -> Result<usize, DomainError>;

    /// Rotation metadata for the file; must precede `start`
    fn set_orientation_hint(&mut self, orientation: Orientation) -> Result<(), DomainError>;

    /// Begin the write session (writes the container header)
    fn start(&mut self) -> Result<(), DomainError>;

    /// Append one sample at `timestamp_us` to `track`
    fn write_sample(
        &mut self,
        track: usize,
        payload: &[u8],
        timestamp_us: i64,
        flags: SampleFlags,
    ) -> Result<(), DomainError>;

    /// Finish the file; calling it on a stopped writer is a no-op
    fn stop(&mut self) -> Result<(), DomainError>;

    /// Free the underlying engine resources; never fails
    fn release(&mut self);
}

/// Port for reading samples back from a finished container
pub trait ContainerReader: Send {
    fn track_count(&self) -> usize;

    /// Format of track `index`, including its duration
    fn track_format(&self, index: usize) -> Result<TrackFormat, DomainError>;

    /// Restrict `read_sample` to one track
    fn select_track(&mut self, index: usize) -> Result<(), DomainError>;

    /// Read the next sample of the selected track into `buf`; `None` at end of stream
    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<Option<SampleMeta>, DomainError>;

    fn release(&mut self);
}

/// Port for creating writers and readers for one container backend
pub trait MediaStore: Send + Sync {
    fn create_writer(&self, path: &Path) -> Result<Box<dyn ContainerWriter>, DomainError>;

    fn open_reader(&self, path: &Path) -> Result<Box<dyn ContainerReader>, DomainError>;

    /// File extension (without dot) of the backend's container
    fn extension(&self) -> &'static str;

    /// MIME type announced to the media index
    fn mime_type(&self) -> &'static str;
}

/// Port for announcing new media files to whatever indexes them
pub trait MediaIndex: Send + Sync {
    /// Fire-and-forget; failures are the index's own business
    fn notify(&self, path: &Path, mime_type: &str);
}

/// Port for consumers of progress snapshots
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, snapshot: &ProgressSnapshot);
}

/// Scope guard that releases a writer on every exit path
pub struct WriterGuard(Option<Box<dyn ContainerWriter>>);

impl WriterGuard {
    pub fn new(writer: Box<dyn ContainerWriter>) -> Self {
        Self(Some(writer))
    }

    pub fn get_mut(&mut self) -> Result<&mut (dyn ContainerWriter + 'static), DomainError> {
        self.0
            .as_deref_mut()
            .ok_or_else(|| DomainError::MuxFail("Writer already released".to_string()))
    }

    pub fn is_released(&self) -> bool {
        self.0.is_none()
    }

    /// Stop then release; release happens even when stop fails
    pub fn finish(&mut self) -> Result<(), DomainError> {
        match self.0.take() {
            Some(mut writer) => {
                let stopped = writer.stop();
                writer.release();
                stopped
            }
            None => Ok(()),
        }
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        if let Some(mut writer) = self.0.take() {
            writer.release();
        }
    }
}

/// Scope guard that releases a reader on every exit path
pub struct ReaderGuard(Box<dyn ContainerReader>);

impl ReaderGuard {
    pub fn new(reader: Box<dyn ContainerReader>) -> Self {
        Self(reader)
    }
}

impl std::ops::Deref for ReaderGuard {
    type Target = dyn ContainerReader;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl std::ops::DerefMut for ReaderGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.0.as_mut()
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

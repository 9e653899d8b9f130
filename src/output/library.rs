//! Media directory layout: naming, listing and purging of recorded files

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::domain::errors::DomainError;

const SEGMENT_PREFIX: &str = "segment_";

/// Kind of file found in the media directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Per-press recording waiting to be stitched
    Segment,
    /// Stitched session output
    Output,
}

/// One file in the media directory
#[derive(Debug, Clone, Serialize)]
pub struct MediaEntry {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Names and finds recorded files in one directory
#[derive(Debug, Clone)]
pub struct MediaLibrary {
    root: PathBuf,
    extension: String,
}

impl MediaLibrary {
    pub fn new(root: impl Into<PathBuf>, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Create the media directory if needed
    pub fn ensure_root(&self) -> Result<(), DomainError> {
        std::fs::create_dir_all(&self.root).map_err(|e| {
            DomainError::FsFail(format!("Failed to create media directory {}: {}", self.root.display(), e))
        })
    }

    /// Path for a new segment, named by creation time in milliseconds
    pub fn segment_path(&self, created: DateTime<Utc>) -> PathBuf {
        let stem = format!("{}{}", SEGMENT_PREFIX, created.timestamp_millis());
        self.unique_path(&stem)
    }

    /// Path for a merged output, named by completion time
    pub fn output_path(&self, completed: DateTime<Local>) -> PathBuf {
        let stem = completed.format("%Y_%m_%d_%H_%M_%S").to_string();
        self.unique_path(&stem)
    }

    /// `<stem>.<ext>`, or `<stem>_<n>.<ext>` when taken
    fn unique_path(&self, stem: &str) -> PathBuf {
        let first = self.root.join(format!("{}.{}", stem, self.extension));
        if !first.exists() {
            return first;
        }
        (1u32..)
            .map(|n| self.root.join(format!("{}_{}.{}", stem, n, self.extension)))
            .find(|candidate| !candidate.exists())
            .unwrap_or(first)
    }

    /// Classify a file by name; `None` for files this library did not create
    pub fn classify(&self, path: &Path) -> Option<MediaKind> {
        if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem.starts_with('.') {
            return None;
        }
        if stem.starts_with(SEGMENT_PREFIX) {
            Some(MediaKind::Segment)
        } else {
            Some(MediaKind::Output)
        }
    }

    /// All recognised files, oldest first
    pub fn entries(&self) -> Result<Vec<MediaEntry>, DomainError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| DomainError::FsFail(format!("Failed to scan media directory: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(kind) = self.classify(entry.path()) else {
                continue;
            };
            let metadata = entry
                .metadata()
                .map_err(|e| DomainError::FsFail(format!("Failed to stat {}: {}", entry.path().display(), e)))?;
            entries.push(MediaEntry {
                path: entry.path().to_path_buf(),
                kind,
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));
        Ok(entries)
    }

    pub fn outputs(&self) -> Result<Vec<MediaEntry>, DomainError> {
        Ok(self.entries()?.into_iter().filter(|e| e.kind == MediaKind::Output).collect())
    }

    /// Segment files not yet merged into an output
    pub fn stale_segments(&self) -> Result<Vec<MediaEntry>, DomainError> {
        Ok(self.entries()?.into_iter().filter(|e| e.kind == MediaKind::Segment).collect())
    }

    /// Delete segment files left behind; returns how many were removed
    pub fn purge_segments(&self) -> Result<usize, DomainError> {
        let stale = self.stale_segments()?;
        Ok(remove_files(stale.iter().map(|e| e.path.as_path())))
    }
}

/// Best-effort deletion; failures are logged and skipped
pub fn remove_files<'a>(paths: impl IntoIterator<Item = &'a Path>) -> usize {
    let mut removed = 0;
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not delete {}: {}", path.display(), e),
        }
    }
    if removed > 0 {
        info!("Removed {} media file(s)", removed);
    }
    removed
}

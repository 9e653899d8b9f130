// Tracing media index - announces finished media as structured log events

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

use crate::ports::MediaIndex;

/// Media index that records new files in the log stream
#[derive(Debug, Default)]
pub struct TracingMediaIndex {
    announced: AtomicU64,
}

impl TracingMediaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files announced so far
    pub fn announced(&self) -> u64 {
        self.announced.load(Ordering::Relaxed)
    }
}

impl MediaIndex for TracingMediaIndex {
    fn notify(&self, path: &Path, mime_type: &str) {
        let size = std::fs::metadata(path).map(|m| m.len()).ok();
        self.announced.fetch_add(1, Ordering::Relaxed);
        info!(
            target: "holdrec::media_index",
            path = %path.display(),
            mime = mime_type,
            size = ?size,
            "New media available"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_never_fails_on_missing_file() {
        let index = TracingMediaIndex::new();
        index.notify(Path::new("/nonexistent/holdrec.mp4"), "video/mp4");
        assert_eq!(index.announced(), 1);
    }
}

//! Temporary artifact ownership for fetched files.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A fetched file held in working storage.
///
/// The artifact owns its on-disk file and removes it when dropped, so the
/// temporary copy is released on every exit path, including errors and
/// task cancellation. Callers that need to keep the bytes must copy them
/// elsewhere before the artifact goes out of scope.
#[derive(Debug)]
pub struct TransientArtifact {
    path: PathBuf,
    filename: String,
    size: u64,
}

impl TransientArtifact {
    pub(crate) fn new(path: PathBuf, filename: String) -> Self {
        Self {
            path,
            filename,
            size: 0,
        }
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// Path of the file in working storage.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// User-facing filename derived during the fetch.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Actual byte size of the completed transfer.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Drop for TransientArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed transient artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove transient artifact");
            }
        }
    }
}

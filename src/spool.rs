//! On-disk spool for file payloads in flight
//!
//! Each upload streams its file part into a uniquely named temp file and
//! hands the path to the repository backend on completion. The file is
//! private to the service (0600) and is unlinked when the spool drops, so
//! no request leaves a descriptor or a path behind.

use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// A write sink backed by a uniquely named temporary file.
pub struct TempFileSpool {
    file: NamedTempFile,
}

impl TempFileSpool {
    /// Create a spool file named `<dir>/<filename><random>`.
    ///
    /// Only the final path component of `filename` is used, so a
    /// client-supplied name cannot steer the file outside `dir`.
    pub fn create(dir: &Path, filename: &str) -> io::Result<Self> {
        let prefix = filename
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("upload");

        let file = tempfile::Builder::new().prefix(prefix).tempfile_in(dir)?;
        Ok(Self { file })
    }

    /// Write all of `bytes`, retrying short writes until drained.
    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.write_all(bytes)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

//! Per-request upload session
//!
//! Owns everything one request accumulates: the multipart parser (and with
//! it the spool), the authenticated identity and the progress-registry
//! entry. Dropping the session is the single teardown path: the registry
//! entry disappears and the spooled file is unlinked, on success and on
//! every failure alike.

use crate::multipart::{MultipartError, MultipartParser};
use crate::progress::ProgressGuard;
use std::path::Path;

pub struct UploadSession {
    repo_id: String,
    user: String,
    parser: MultipartParser,
    progress: ProgressGuard,
}

impl UploadSession {
    pub fn new(
        repo_id: String,
        user: String,
        parser: MultipartParser,
        progress: ProgressGuard,
    ) -> Self {
        Self {
            repo_id,
            user,
            parser,
            progress,
        }
    }

    /// Account one body chunk and run it through the parser.
    ///
    /// The counter advances even for chunks the parser later rejects: the
    /// bytes were received, which is what the polling client asks about.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<(), MultipartError> {
        self.progress.bump(chunk.len() as i64);
        self.parser.feed(chunk)
    }

    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.parser.form_value(key)
    }

    pub fn file_name(&self) -> Option<&str> {
        self.parser.file_name()
    }

    pub fn spool_path(&self) -> Option<&Path> {
        self.parser.spool_path()
    }
}

//! Repository backend collaborator interfaces
//!
//! The gateway does not store files itself: access-token resolution, quota
//! accounting, directory listings and the final file ingestion all live in
//! the repository backend. These traits are the seam; [`crate::rpc`]
//! provides the wire implementation and tests substitute in-memory fakes.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Identity a web access token resolves to.
#[derive(Debug, Clone)]
pub struct WebAccess {
    pub repo_id: String,
    pub user: String,
}

/// Errors from file ingestion operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid filename")]
    InvalidFilename,

    #[error("file already exists")]
    AlreadyExists,

    #[error("file does not exist")]
    NotFound,

    #[error("rpc transport: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

/// Errors from quota checks
#[derive(Debug, Error)]
pub enum QuotaError {
    #[error("repository {0} is over quota")]
    Over(String),

    #[error("rpc transport: {0}")]
    Transport(String),
}

/// Resolves short-lived upload tokens to a repository and user.
#[async_trait]
pub trait AccessAuthority: Send + Sync {
    /// None when the token is unknown, expired or revoked.
    async fn query_access_token(&self, token: &str) -> Option<WebAccess>;
}

/// Quota accounting for repositories.
#[async_trait]
pub trait QuotaAuthority: Send + Sync {
    async fn check_quota(&self, repo_id: &str) -> Result<(), QuotaError>;
}

/// Read-only view of repository trees.
#[async_trait]
pub trait RepoDirectory: Send + Sync {
    /// Entry names of `parent_dir` at the repository's head commit, or None
    /// when the repository or the path cannot be resolved.
    async fn head_dir_listing(&self, repo_id: &str, parent_dir: &str) -> Option<Vec<String>>;
}

/// File ingestion into the repository.
///
/// Both operations read the staged file from `src_path` and complete
/// synchronously before returning; the caller may unlink the file
/// afterwards.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Add a new file under `parent_dir/name`.
    async fn post_file(
        &self,
        repo_id: &str,
        src_path: &Path,
        parent_dir: &str,
        name: &str,
        user: &str,
    ) -> Result<(), StoreError>;

    /// Replace the existing file `parent_dir/name` in place.
    async fn put_file(
        &self,
        repo_id: &str,
        src_path: &Path,
        parent_dir: &str,
        name: &str,
        user: &str,
    ) -> Result<(), StoreError>;
}

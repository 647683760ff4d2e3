//! Collision-free naming for uploaded files
//!
//! A requested filename is checked against the directory snapshot at the
//! repository's head commit. On collision the name is suffixed
//! `"<stem> (i)"` before the extension, for i up to 16. If every candidate
//! collides the last one is returned anyway and the storage backend's
//! already-exists rejection surfaces the conflict.

use crate::repo::RepoDirectory;
use tracing::warn;

const MAX_RENAME_ATTEMPTS: u32 = 16;

/// Split a filename at its last dot into stem and extension.
pub fn split_filename(filename: &str) -> (&str, Option<&str>) {
    match filename.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext)),
        None => (filename, None),
    }
}

/// Pick a name for `desired` that is absent from `listing`.
pub fn unique_filename(listing: &[String], desired: &str) -> String {
    let (stem, ext) = split_filename(desired);
    let mut candidate = desired.to_string();
    let mut i = 1;
    while listing.iter().any(|name| *name == candidate) && i <= MAX_RENAME_ATTEMPTS {
        candidate = match ext {
            Some(ext) => format!("{stem} ({i}).{ext}"),
            None => format!("{stem} ({i})"),
        };
        i += 1;
    }
    candidate
}

/// Resolve a non-colliding name for `desired` inside `parent_dir`, against
/// the snapshot at the repository's head commit. None if the repository or
/// the directory cannot be resolved.
pub async fn resolve_unique_name(
    repo: &dyn RepoDirectory,
    repo_id: &str,
    parent_dir: &str,
    desired: &str,
) -> Option<String> {
    let Some(listing) = repo.head_dir_listing(repo_id, parent_dir).await else {
        warn!(repo_id, parent_dir, "cannot list directory at head commit");
        return None;
    };
    Some(unique_filename(&listing, desired))
}

//! Upload, update and progress-poll handlers
//!
//! The upload and update endpoints share everything up to the terminator:
//! the headers phase authenticates the URL token, extracts the multipart
//! boundary and registers the progress counter; the body phase streams
//! chunks into the session. They differ only in how the staged file is
//! handed to the repository backend and which error page the browser is
//! sent to.

use super::errors::{
    bad_request, classify_post_error, classify_put_error, server_error, UploadFailure,
};
use super::redirect;
use crate::multipart::{boundary_from_content_type, MultipartError, MultipartParser};
use crate::naming::resolve_unique_name;
use crate::progress::ProgressRegistry;
use crate::repo::{AccessAuthority, FileStore, QuotaAuthority, RepoDirectory};
use crate::session::UploadSession;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path as UrlPath, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Application state shared across handlers
pub struct AppState {
    pub access: Arc<dyn AccessAuthority>,
    pub quota: Arc<dyn QuotaAuthority>,
    pub repo: Arc<dyn RepoDirectory>,
    pub store: Arc<dyn FileStore>,
    pub progress: Arc<ProgressRegistry>,
    pub service_url: String,
    pub spool_dir: PathBuf,
    pub max_upload_size: u64,
}

/// Query parameters for the upload and update endpoints
#[derive(Debug, serde::Deserialize, Default)]
pub struct UploadQuery {
    #[serde(rename = "X-Progress-ID")]
    pub progress_id: Option<String>,
}

/// Query parameters for progress polling
#[derive(Debug, serde::Deserialize, Default)]
pub struct ProgressQuery {
    #[serde(rename = "X-Progress-ID")]
    pub progress_id: Option<String>,
    pub callback: Option<String>,
}

/// Build the service router.
///
/// The built-in body limit is disabled: bodies are never buffered whole,
/// and the size cap is enforced against the spooled file by the
/// terminators.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/upload/*token", post(upload_file))
        .route("/update/*token", post(update_file))
        .route("/upload_progress", get(upload_progress))
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /upload/<token>?X-Progress-ID=<id>
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    UrlPath(token_path): UrlPath<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let mut session = match begin_session(&state, &token_path, &headers, &query).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    if let Err(response) = pump_body(&mut session, body).await {
        return response;
    }
    finish_upload(&state, &session).await
}

/// POST /update/<token>?X-Progress-ID=<id>
pub async fn update_file(
    State(state): State<Arc<AppState>>,
    UrlPath(token_path): UrlPath<String>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let mut session = match begin_session(&state, &token_path, &headers, &query).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    if let Err(response) = pump_body(&mut session, body).await {
        return response;
    }
    finish_update(&state, &session).await
}

/// GET /upload_progress?X-Progress-ID=<id>&callback=<fn>
///
/// Responds with a JSONP call so the UI can poll from a plain script tag.
pub async fn upload_progress(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProgressQuery>,
) -> Response {
    let (Some(progress_id), Some(callback)) =
        (query.progress_id.as_deref(), query.callback.as_deref())
    else {
        warn!("progress poll without id or callback");
        return StatusCode::BAD_REQUEST.into_response();
    };

    let Some((uploaded, total)) = state.progress.snapshot(progress_id) else {
        debug!(progress_id, "no progress entry");
        return StatusCode::BAD_REQUEST.into_response();
    };

    format!("{callback}({{\"uploaded\": {uploaded}, \"length\": {total}}});").into_response()
}

/// Validate the request headers and set up the session.
///
/// Any failure here answers before a single body byte is processed, with
/// the connection marked for closing.
async fn begin_session(
    state: &Arc<AppState>,
    token_path: &str,
    headers: &HeaderMap,
    query: &UploadQuery,
) -> Result<UploadSession, Response> {
    let Some(token) = trailing_segment(token_path) else {
        warn!("no token in upload url");
        return Err(bad_request(Some("Invalid URL")));
    };

    let Some(access) = state.access.query_access_token(token).await else {
        warn!("invalid access token");
        return Err(bad_request(Some("Access denied")));
    };

    let Some(boundary) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(boundary_from_content_type)
    else {
        warn!("missing or invalid multipart Content-Type");
        return Err(bad_request(None));
    };

    let Some(total) = content_length(headers) else {
        warn!("Content-Length not found");
        return Err(bad_request(None));
    };

    let Some(progress_id) = query.progress_id.as_deref() else {
        warn!("progress id not found");
        return Err(bad_request(None));
    };

    let progress = match state.progress.clone().begin(progress_id, total) {
        Ok(guard) => guard,
        Err(e) => {
            warn!("{e}");
            return Err(bad_request(None));
        }
    };

    info!(repo_id = %access.repo_id, user = %access.user, "receiving upload");
    let parser = MultipartParser::new(boundary, state.spool_dir.clone());
    Ok(UploadSession::new(access.repo_id, access.user, parser, progress))
}

/// Drive the body stream through the session.
async fn pump_body(session: &mut UploadSession, body: Body) -> Result<(), Response> {
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("body stream aborted: {e}");
                return Err(bad_request(None));
            }
        };
        match session.push_chunk(&chunk) {
            Ok(()) => {}
            Err(MultipartError::Malformed(reason)) => {
                warn!("rejecting upload body: {reason}");
                return Err(bad_request(None));
            }
            Err(MultipartError::Io(e)) => {
                warn!("spool write failed: {e}");
                return Err(server_error());
            }
        }
    }
    Ok(())
}

async fn finish_upload(state: &AppState, session: &UploadSession) -> Response {
    let Some(parent_dir) = session.form_value("parent_dir") else {
        warn!("no parent dir given");
        return bad_request(Some("Invalid URL."));
    };

    match post_staged_file(state, session, parent_dir).await {
        Ok(()) => redirect::found(redirect::success_url(
            &state.service_url,
            session.repo_id(),
            parent_dir,
        )),
        Err(failure) => redirect::found(redirect::upload_error_url(
            &state.service_url,
            session.repo_id(),
            parent_dir,
            session.file_name().unwrap_or_default(),
            failure,
        )),
    }
}

async fn finish_update(state: &AppState, session: &UploadSession) -> Response {
    let Some(target_file) = session.form_value("target_file") else {
        warn!("no target file given");
        return bad_request(Some("Invalid URL."));
    };
    let (parent_dir, file_name) = split_target_path(target_file);

    match put_staged_file(state, session, &parent_dir, &file_name).await {
        Ok(()) => redirect::found(redirect::success_url(
            &state.service_url,
            session.repo_id(),
            &parent_dir,
        )),
        Err(failure) => redirect::found(redirect::update_error_url(
            &state.service_url,
            session.repo_id(),
            target_file,
            failure,
        )),
    }
}

async fn post_staged_file(
    state: &AppState,
    session: &UploadSession,
    parent_dir: &str,
) -> Result<(), UploadFailure> {
    let spool_path = staged_file_checks(state, session).await?;
    let file_name = session.file_name().ok_or(UploadFailure::Recv)?;

    let unique_name =
        resolve_unique_name(state.repo.as_ref(), session.repo_id(), parent_dir, file_name)
            .await
            .ok_or(UploadFailure::Internal)?;

    state
        .store
        .post_file(
            session.repo_id(),
            &spool_path,
            parent_dir,
            &unique_name,
            session.user(),
        )
        .await
        .map_err(|e| {
            warn!("post_file rejected: {e}");
            classify_post_error(&e)
        })?;

    info!(repo_id = %session.repo_id(), name = %unique_name, "file posted");
    Ok(())
}

async fn put_staged_file(
    state: &AppState,
    session: &UploadSession,
    parent_dir: &str,
    file_name: &str,
) -> Result<(), UploadFailure> {
    let spool_path = staged_file_checks(state, session).await?;

    state
        .store
        .put_file(
            session.repo_id(),
            &spool_path,
            parent_dir,
            file_name,
            session.user(),
        )
        .await
        .map_err(|e| {
            warn!("put_file rejected: {e}");
            classify_put_error(&e)
        })?;

    info!(repo_id = %session.repo_id(), name = %file_name, "file updated");
    Ok(())
}

/// Size and quota gating shared by both terminators. Returns the spool path
/// so the caller can hand it to the backend.
async fn staged_file_checks(
    state: &AppState,
    session: &UploadSession,
) -> Result<PathBuf, UploadFailure> {
    // A body with no file part never opened a spool; reject it the same way
    // as a truncated receive.
    let Some(spool_path) = session.spool_path() else {
        warn!("body carried no file part");
        return Err(UploadFailure::Recv);
    };

    let meta = match tokio::fs::metadata(spool_path).await {
        Ok(meta) => meta,
        Err(e) => {
            warn!("failed to stat spooled file: {e}");
            return Err(UploadFailure::Recv);
        }
    };
    if meta.len() > state.max_upload_size {
        warn!(size = meta.len(), "uploaded file is too large");
        return Err(UploadFailure::Size);
    }

    if let Err(e) = state.quota.check_quota(session.repo_id()).await {
        warn!("quota check failed: {e}");
        return Err(UploadFailure::Quota);
    }

    Ok(spool_path.to_path_buf())
}

/// The upload URL carries the access token as its last path segment.
fn trailing_segment(path: &str) -> Option<&str> {
    path.rsplit('/').next().filter(|s| !s.is_empty())
}

fn content_length(headers: &HeaderMap) -> Option<i64> {
    let value = headers.get(header::CONTENT_LENGTH)?.to_str().ok()?;
    Some(leading_i64(value))
}

/// Leading decimal digits of `s`, 0 when there are none. The counter total
/// is advisory, so a malformed header does not fail the request.
fn leading_i64(s: &str) -> i64 {
    let s = s.trim();
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s[..end].parse().unwrap_or(0)
}

/// Split a target path the way the web UI composes it: the dirname of
/// "b.txt" is ".", of "/b.txt" is "/".
fn split_target_path(target: &str) -> (String, String) {
    match target.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((parent, name)) => (parent.to_string(), name.to_string()),
        None => (".".to_string(), target.to_string()),
    }
}

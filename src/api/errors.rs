//! Upload failure codes and early-failure responses

use crate::repo::StoreError;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

/// Business failure codes carried in the `err=` query parameter of the
/// error-page redirects. The declaration order fixes the wire values; the
/// web UI decodes them positionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFailure {
    Filename,
    Exists,
    NotExist,
    Size,
    Quota,
    Recv,
    Internal,
}

impl UploadFailure {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Wire code for a rejected post_file.
pub fn classify_post_error(err: &StoreError) -> UploadFailure {
    match err {
        StoreError::InvalidFilename => UploadFailure::Filename,
        StoreError::AlreadyExists => UploadFailure::Exists,
        _ => UploadFailure::Internal,
    }
}

/// Wire code for a rejected put_file.
pub fn classify_put_error(err: &StoreError) -> UploadFailure {
    match err {
        StoreError::NotFound => UploadFailure::NotExist,
        _ => UploadFailure::Internal,
    }
}

/// 400 with an optional one-line body. The connection is closed so a
/// rejected client cannot keep streaming its body into a kept-alive socket.
pub fn bad_request(message: Option<&str>) -> Response {
    let body = match message {
        Some(message) => format!("{message}\n"),
        None => String::new(),
    };
    (
        StatusCode::BAD_REQUEST,
        [(header::CONNECTION, "close")],
        body,
    )
        .into_response()
}

/// 500 for spool failures mid-body; closes the connection like [`bad_request`].
pub fn server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [(header::CONNECTION, "close")],
        "Internal server error\n",
    )
        .into_response()
}

//! Redirects to the web UI
//!
//! Every terminator outcome lands the browser back on the UI: the
//! repository page on success, a dedicated error page otherwise. Path and
//! filename components are percent-encoded; the failure code travels in the
//! `err=` query parameter.

use super::errors::UploadFailure;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use urlencoding::encode;

pub fn success_url(service_url: &str, repo_id: &str, parent_dir: &str) -> String {
    format!("{service_url}/repo/{repo_id}?p={}", encode(parent_dir))
}

pub fn upload_error_url(
    service_url: &str,
    repo_id: &str,
    parent_dir: &str,
    filename: &str,
    failure: UploadFailure,
) -> String {
    format!(
        "{service_url}/repo/upload_error/{repo_id}?p={}&fn={}&err={}",
        encode(parent_dir),
        encode(filename),
        failure.code()
    )
}

pub fn update_error_url(
    service_url: &str,
    repo_id: &str,
    target_file: &str,
    failure: UploadFailure,
) -> String {
    format!(
        "{service_url}/repo/update_error/{repo_id}?p={}&err={}",
        encode(target_file),
        failure.code()
    )
}

pub fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)], "").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://ui.example.com";

    #[test]
    fn test_success_url_escapes_path() {
        assert_eq!(
            success_url(BASE, "repo-1", "/docs"),
            "https://ui.example.com/repo/repo-1?p=%2Fdocs"
        );
    }

    #[test]
    fn test_upload_error_url() {
        assert_eq!(
            upload_error_url(BASE, "repo-1", "/a b", "f&g.txt", UploadFailure::Size),
            "https://ui.example.com/repo/upload_error/repo-1?p=%2Fa%20b&fn=f%26g.txt&err=3"
        );
    }

    #[test]
    fn test_update_error_url() {
        assert_eq!(
            update_error_url(BASE, "repo-1", "/a/b.txt", UploadFailure::NotExist),
            "https://ui.example.com/repo/update_error/repo-1?p=%2Fa%2Fb.txt&err=2"
        );
    }

    #[test]
    fn test_found_response() {
        let resp = found("https://ui.example.com/repo/r".to_string());
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "https://ui.example.com/repo/r"
        );
    }
}

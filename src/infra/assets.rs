//! Passthrough asset serving for the live router.
//!
//! The same directory the build copies under `static/` is served from disk
//! here, so both surfaces expose identical URLs.

use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use mime_guess::Mime;

use crate::application::error::ErrorReport;

const SOURCE: &str = "infra::assets::serve_static";

/// Serve `path` from `root`, or answer 404.
pub async fn serve_static(root: Option<&Path>, path: &str) -> Response {
    let Some(root) = root else {
        return not_found_response();
    };
    let Some(file) = resolve_asset(root, path) else {
        return not_found_response();
    };

    match tokio::fs::read(&file).await {
        Ok(bytes) => build_response(Bytes::from(bytes), mime_guess::from_path(&file).first_or_octet_stream()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => not_found_response(),
        Err(err) => {
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            ErrorReport::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, &err)
                .attach(&mut response);
            response
        }
    }
}

fn not_found_response() -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    ErrorReport::from_message(SOURCE, StatusCode::NOT_FOUND, "Static asset not found")
        .attach(&mut response);
    response
}

fn resolve_asset(root: &Path, path: &str) -> Option<PathBuf> {
    let candidate = path.trim_start_matches('/');
    if candidate.is_empty()
        || candidate.ends_with('/')
        || candidate.split('/').any(|segment| segment == ".." || segment.is_empty())
    {
        return None;
    }
    Some(root.join(candidate))
}

fn build_response(bytes: Bytes, mime: Mime) -> Response {
    let len = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&len.to_string()) {
        headers.insert(header::CONTENT_LENGTH, value);
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serves_files_with_guessed_mime() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("css")).expect("mkdir");
        std::fs::write(dir.path().join("css/site.css"), "body{}").expect("write");

        let response = serve_static(Some(dir.path()), "css/site.css").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("text/css")
        );
    }

    #[tokio::test]
    async fn traversal_and_directories_are_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("css")).expect("mkdir");

        for path in ["../secret", "css/", "", "css//x"] {
            let response = serve_static(Some(dir.path()), path).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{path}");
        }
        let response = serve_static(None, "css/site.css").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

mod admin;
mod blobs;
mod files;

use axum::http::HeaderMap;

pub use admin::{health, pipeline_stats};
pub use blobs::serve_signed;
pub use files::{delete_file, download_file, preview_file, upload_file};

/// Header carrying the caller's identity, set by the upstream gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity from the request, empty when absent.
fn caller_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

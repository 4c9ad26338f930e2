use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::response::{ApiError, AppQuery};
use crate::blob_store::{BlobStore, BlobStoreError, PresignVerb};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SignedLinkParams {
    pub verb: String,
    pub expires: i64,
    pub signature: String,
}

/// Serve an object through a presigned link issued by the local backend.
/// Route: GET /blobs/:bucket/*key
pub async fn serve_signed(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    AppQuery(params): AppQuery<SignedLinkParams>,
) -> Result<Response, ApiError> {
    let store = state
        .local_store
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Signed links are not served by this backend"))?;

    if params.verb != PresignVerb::Get.as_str()
        || !store.verify_presigned(
            &bucket,
            &key,
            PresignVerb::Get,
            params.expires,
            &params.signature,
        )
    {
        return Err(ApiError::forbidden("Invalid or expired link"));
    }

    let object = store.get(&bucket, &key).await.map_err(|e| match e {
        BlobStoreError::NotFound(_) => ApiError::not_found("File content not found"),
        _ => ApiError::internal(format!("Failed to retrieve file: {e}")),
    })?;

    let mut response = (StatusCode::OK, object.data).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        object
            .content_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(object.size));

    // Objects are immutable once written; the link itself expires
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=300"),
    );

    Ok(response)
}

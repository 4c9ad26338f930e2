use axum::body::Body;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;

use super::caller_id;
use crate::api::response::{ApiError, JSend};
use crate::pipeline::{ArtifactInfo, Payload, StorageRequest};
use crate::AppState;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct FileResponse {
    pub artifacts: Vec<ArtifactInfo>,
    pub content_type: String,
    pub file_key: String,
    pub size: u64,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub content_type: String,
    pub file_key: String,
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub file_key: String,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<JSend<FileResponse>>, ApiError> {
    let mut file_data: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut file_content_type: Option<String> = None;
    let mut entity_type: Option<String> = None;
    let mut entity_id: Option<String> = None;
    let mut category: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "file" => {
                file_name = field.file_name().map(|s| s.to_string());
                file_content_type = field.content_type().map(|s| s.to_string());

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;

                if data.len() as u64 > state.config.max_upload_size {
                    return Err(ApiError::payload_too_large(format!(
                        "File exceeds maximum upload size of {} bytes",
                        state.config.max_upload_size
                    )));
                }
                file_data = Some(data);
            }
            "entity_type" | "entity_id" | "category" => {
                let value = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Invalid {field_name}: {e}"))
                })?;
                let slot = match field_name.as_str() {
                    "entity_type" => &mut entity_type,
                    "entity_id" => &mut entity_id,
                    _ => &mut category,
                };
                *slot = Some(value.trim().to_string());
            }
            _ => {
                // Ignore unknown fields
            }
        }
    }

    let file_data = file_data.ok_or_else(|| ApiError::bad_request("file field is required"))?;
    let entity_type =
        entity_type.ok_or_else(|| ApiError::bad_request("entity_type field is required"))?;
    let entity_id =
        entity_id.ok_or_else(|| ApiError::bad_request("entity_id field is required"))?;
    let category = category.ok_or_else(|| ApiError::bad_request("category field is required"))?;

    // Determine MIME type: from multipart Content-Type, or guess from filename, or fallback
    let content_type = file_content_type
        .filter(|ct| ct != "application/octet-stream")
        .or_else(|| {
            file_name
                .as_deref()
                .and_then(|n| mime_guess::from_path(n).first())
                .map(|m| m.to_string())
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let request = StorageRequest::upload(
        entity_type,
        entity_id,
        category,
        file_name.unwrap_or_default(),
        Payload::new(file_data, content_type),
    )
    .with_user(caller_id(&headers));

    let response = state.service.process(request).await?;

    tracing::debug!(file_key = %response.file_key, size = response.size, "Uploaded file");

    Ok(JSend::success(FileResponse {
        artifacts: response.artifacts.snapshot(),
        content_type: response.content_type,
        file_key: response.file_key,
        size: response.size,
    }))
}

/// Stream a stored object back, honoring a single `Range` header.
/// Route: GET /files/*key
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let mut request = StorageRequest::download(key).with_user(caller_id(&headers));
    if let Some(range) = headers.get(header::RANGE) {
        let range = range
            .to_str()
            .map_err(|_| ApiError::bad_request("Range header must be ASCII"))?;
        request = request.with_range(range);
    }

    let file = state.service.process(request).await?;
    let data = file.data.unwrap_or_default();
    let status = if file.range.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let length = data.len() as u64;
    let mut response = (status, Body::from(data)).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        file.content_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    if let Some(range) = file.range {
        if let Ok(value) = range.content_range(file.size).parse() {
            headers.insert(header::CONTENT_RANGE, value);
        }
    }

    // Set Content-Disposition with filename from the key's last segment
    let filename = file.file_key.rsplit('/').next().unwrap_or(&file.file_key);
    if let Ok(value) = format!("inline; filename=\"{filename}\"").parse() {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok(response)
}

pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JSend<DeleteResponse>>, ApiError> {
    let request = StorageRequest::delete(key).with_user(caller_id(&headers));
    let response = state.service.process(request).await?;

    tracing::debug!(file_key = %response.file_key, "Deleted file");
    Ok(JSend::success(DeleteResponse {
        file_key: response.file_key,
    }))
}

pub async fn preview_file(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JSend<PreviewResponse>>, ApiError> {
    let request = StorageRequest::preview(key).with_user(caller_id(&headers));
    let response = state.service.process(request).await?;

    let url = response
        .url
        .ok_or_else(|| ApiError::internal("Preview produced no URL"))?;

    Ok(JSend::success(PreviewResponse {
        content_type: response.content_type,
        file_key: response.file_key,
        size: response.size,
        url,
    }))
}

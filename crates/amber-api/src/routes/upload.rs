//! Upload and delete
//!
//! Both are gated on the client IP allowlist. Uploads stream to a staging
//! file while the digest is computed, then move into place under it.

use std::net::SocketAddr;

use amber_core::parse_blob_path;
use axum::Json;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::error::ApiError;
use crate::guard::ensure_allowed;
use crate::state::AppState;

/// Descriptor returned for a stored upload
#[derive(Debug, Serialize)]
pub struct BlobDescriptor {
    pub url: String,
    pub sha256: String,
    pub size: u64,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub uploaded: i64,
}

/// PUT /upload
pub async fn upload(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    ensure_allowed(&state.upload_nets, addr.ip())?;
    state.store.ensure_dir().await?;

    let (mut file, staging) = state.store.create_staging().await?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut stream = body.into_data_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                state.store.discard_staging(&staging).await;
                return Err(ApiError::BadRequest(format!("Upload failed: {e}")));
            }
        };
        hasher.update(&chunk);
        size += chunk.len() as u64;
        if let Err(e) = file.write_all(&chunk).await {
            drop(file);
            state.store.discard_staging(&staging).await;
            return Err(ApiError::Internal(e.to_string()));
        }
    }
    if let Err(e) = file.flush().await {
        drop(file);
        state.store.discard_staging(&staging).await;
        return Err(ApiError::Internal(e.to_string()));
    }
    drop(file);

    let digest = hex::encode(hasher.finalize());

    // a client that announced the digest up front must have delivered it
    if let Some(expected) = headers.get("x-sha-256").and_then(|v| v.to_str().ok()) {
        if !expected.trim().eq_ignore_ascii_case(&digest) {
            state.store.discard_staging(&staging).await;
            return Err(ApiError::BadRequest("Digest mismatch".to_string()));
        }
    }

    let now = Utc::now().timestamp();
    if state.store.contains(&digest).await {
        // already stored: keep the existing blob, refresh its access time
        state.store.discard_staging(&staging).await;
        state.store.touch(&digest, Some(size)).await;
    } else {
        state
            .store
            .commit_staging(&staging, &digest, size, Some(now))
            .await?;
    }
    let uploaded = state.store.get_uploaded(&digest).await.unwrap_or(now);

    let descriptor = BlobDescriptor {
        url: format!("/{digest}"),
        sha256: digest,
        size,
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        uploaded,
    };

    let mut response = (StatusCode::OK, Json(descriptor)).into_response();
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    Ok(response)
}

/// DELETE `/<64hex>`
pub async fn delete_blob(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    ensure_allowed(&state.upload_nets, addr.ip())?;
    let (digest, _) = parse_blob_path(&path)
        .ok_or_else(|| ApiError::BadRequest("Invalid blob path".to_string()))?;

    if state.store.delete(&digest).await? {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(ApiError::NotFound("Blob not found".to_string()))
    }
}

//! Blob retrieval
//!
//! One handler serves GET and HEAD for `/<64hex>[.ext]`: conditional
//! requests first, then the cache probe, then the deduplicated miss path.

use std::io::SeekFrom;

use amber_core::BlobRequest;
use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::headers::{
    CACHE_CONTROL_IMMUTABLE, apply_blob_headers, content_type_for, etag_for,
    if_none_match_matches,
};
use crate::range::{parse_range, slice_stream};
use crate::state::AppState;

/// GET/HEAD `/<64hex>[.ext]?as=…&sx=…`
pub async fn get_or_head(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let request = BlobRequest::from_parts(&path, query.as_deref())
        .ok_or_else(|| ApiError::BadRequest("Invalid blob path".to_string()))?;
    let etag = etag_for(&request.digest);

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // conditional requests answer before any disk or network work
    if range_header.is_none() && if_none_match_matches(&headers, &etag) {
        return Ok(not_modified(&etag));
    }

    state.store.ensure_dir().await?;

    if let Some((file, size)) = state.store.lookup(&request.digest).await {
        let content_type = content_type_for(None, request.extension.as_deref());
        return serve_cached(
            method,
            range_header.as_deref(),
            file,
            size,
            &content_type,
            &etag,
        )
        .await;
    }

    let handle = state
        .service
        .fetch_blob(&request)
        .await
        .ok_or_else(|| ApiError::NotFound("Blob not found".to_string()))?;

    // watch the verdict in the background; a failed verification purges
    // whatever landed in the cache under this digest
    {
        let store = state.store.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            if !handle.hash_valid().await {
                debug!("purging poisoned cache entry {}", handle.digest);
                if let Err(e) = store.delete(&handle.digest).await {
                    warn!("failed to purge {}: {e}", handle.digest);
                }
            }
        });
    }

    let content_type = content_type_for(
        handle.content_type.as_deref(),
        request.extension.as_deref(),
    );

    if method == Method::HEAD {
        // headers only; the flight keeps draining upstream on its own, so a
        // HEAD still warms the cache
        let mut response = StatusCode::OK.into_response();
        apply_blob_headers(response.headers_mut(), &content_type, &etag);
        if let Some(length) = handle.content_length {
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        return Ok(response);
    }

    match (range_header.as_deref(), handle.content_length) {
        (Some(spec), Some(total)) => {
            let (start, end) = parse_range(spec, total).ok_or(ApiError::RangeNotSatisfiable)?;
            let body = Body::from_stream(slice_stream(handle.subscribe(), start, end));
            let mut response = (StatusCode::PARTIAL_CONTENT, body).into_response();
            let headers = response.headers_mut();
            apply_blob_headers(headers, &content_type, &etag);
            headers.insert(header::CONTENT_RANGE, content_range_value(start, end, total)?);
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(end - start + 1));
            Ok(response)
        }
        (_, length) => {
            // plain GET, or a Range against an unknown total length: stream
            // the whole body
            let body = Body::from_stream(handle.subscribe());
            let mut response = (StatusCode::OK, body).into_response();
            apply_blob_headers(response.headers_mut(), &content_type, &etag);
            if let Some(length) = length {
                response
                    .headers_mut()
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            }
            Ok(response)
        }
    }
}

/// Serve a blob straight from its cache file
async fn serve_cached(
    method: Method,
    range: Option<&str>,
    mut file: File,
    size: u64,
    content_type: &str,
    etag: &str,
) -> Result<Response, ApiError> {
    if method == Method::HEAD {
        let mut response = StatusCode::OK.into_response();
        apply_blob_headers(response.headers_mut(), content_type, etag);
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
        return Ok(response);
    }

    if let Some(spec) = range {
        let (start, end) = parse_range(spec, size).ok_or(ApiError::RangeNotSatisfiable)?;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        let body = Body::from_stream(ReaderStream::new(file.take(end - start + 1)));
        let mut response = (StatusCode::PARTIAL_CONTENT, body).into_response();
        let headers = response.headers_mut();
        apply_blob_headers(headers, content_type, etag);
        headers.insert(header::CONTENT_RANGE, content_range_value(start, end, size)?);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(end - start + 1));
        return Ok(response);
    }

    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = (StatusCode::OK, body).into_response();
    apply_blob_headers(response.headers_mut(), content_type, etag);
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    Ok(response)
}

fn not_modified(etag: &str) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::ETAG,
        HeaderValue::from_str(etag).unwrap_or_else(|_| HeaderValue::from_static("\"\"")),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(CACHE_CONTROL_IMMUTABLE),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

fn content_range_value(start: u64, end: u64, total: u64) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(&format!("bytes {start}-{end}/{total}"))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

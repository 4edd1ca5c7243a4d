//! Response header helpers

use axum::http::{HeaderMap, HeaderValue, header};

/// Blobs are content-addressed, so successful responses never go stale
pub const CACHE_CONTROL_IMMUTABLE: &str = "public, max-age=31536000, immutable";

pub fn etag_for(digest: &str) -> String {
    format!("\"{digest}\"")
}

/// Match `If-None-Match` against our ETag, accepting quoted, weak-prefixed,
/// and wildcard forms.
pub fn if_none_match_matches(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    value.split(',').any(|tag| {
        let tag = tag.trim();
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        tag == etag || tag == "*"
    })
}

/// Content type priority: upstream header, then the requested extension,
/// then a generic default.
pub fn content_type_for(upstream: Option<&str>, extension: Option<&str>) -> String {
    if let Some(content_type) = upstream {
        return content_type.to_string();
    }
    extension
        .and_then(|ext| ext.rsplit('.').next())
        .and_then(|ext| mime_guess::from_ext(ext).first())
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Headers shared by every successful blob response
pub fn apply_blob_headers(headers: &mut HeaderMap, content_type: &str, etag: &str) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
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
}

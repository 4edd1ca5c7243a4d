//! Status page

use axum::extract::State;
use axum::response::{Html, IntoResponse, Response};

use crate::state::AppState;

/// GET /, a plain HTML counter page
pub async fn index(State(state): State<AppState>) -> Response {
    let stats = state.store.stats().await;
    let html = format!(
        "<!DOCTYPE html>\n<html>\n<head><title>Amber Cache</title></head>\n<body>\n<h1>Amber Cache</h1>\n<p>{} blobs cached</p>\n<p>{} stored</p>\n</body>\n</html>\n",
        stats.blob_count,
        human_bytes(stats.total_size.max(0) as u64),
    );
    Html(html).into_response()
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_render_with_scaled_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(human_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }
}

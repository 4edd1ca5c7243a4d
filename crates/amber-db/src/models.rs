//! Metadata row types

use serde::{Deserialize, Serialize};

/// A row in the `cache_metadata` table.
///
/// One row per blob file on disk. `sha256` is the lowercase hex digest that
/// doubles as the file name, `last_accessed` drives LRU eviction, and
/// `uploaded` records when the blob was pushed to us (NULL for blobs that
/// were fetched from an upstream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub sha256: String,
    /// Milliseconds since the Unix epoch.
    pub last_accessed: i64,
    /// File size in bytes.
    pub size: i64,
    /// Seconds since the Unix epoch, or None.
    pub uploaded: Option<i64>,
}

//! On-disk blob store
//!
//! Stores blobs as `<cache_dir>/<64 hex chars>` with no extension, alongside
//! a dot-prefixed SQLite metadata database. All mutations of the cache
//! directory go through this type.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use amber_db::{BlobRecord, Database};
use chrono::Utc;
use tokio::fs::{self, File};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StoreError;

/// File name of the embedded metadata database inside the cache directory.
/// Dot-prefixed so directory rebuild scans skip it (and its WAL siblings).
pub const METADATA_DB_FILE: &str = ".cache-metadata.db";

/// Aggregate counters for the status page
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub blob_count: i64,
    pub total_size: i64,
}

/// Blob directory plus metadata database.
///
/// Serving correctness depends only on the files; metadata failures are
/// logged and absorbed here, never surfaced to the request path.
pub struct BlobStore {
    cache_dir: PathBuf,
    db: Database,
    max_size: Option<u64>,
}

impl BlobStore {
    /// Create the cache directory if needed, open the metadata database, and
    /// rebuild the metadata from the directory when the schema is new or was
    /// unreadable.
    pub async fn open(cache_dir: &Path, max_size: Option<u64>) -> Result<Arc<Self>, StoreError> {
        fs::create_dir_all(cache_dir).await?;

        let (db, fresh) = Database::open(&cache_dir.join(METADATA_DB_FILE)).await?;
        let store = Arc::new(Self {
            cache_dir: cache_dir.to_path_buf(),
            db,
            max_size,
        });

        if fresh {
            store.rebuild_from_directory().await?;
        }

        info!(
            "blob store ready at {:?} (size limit: {:?})",
            store.cache_dir, store.max_size
        );
        Ok(store)
    }

    /// Access the metadata database
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Re-create the cache directory if something removed it at runtime
    pub async fn ensure_dir(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.cache_dir).await?;
        Ok(())
    }

    pub(crate) fn blob_path(&self, digest: &str) -> PathBuf {
        self.cache_dir.join(digest)
    }

    /// In-progress cache writes live under a dot-prefixed name so rebuild
    /// scans never index partial data.
    pub(crate) fn part_path(&self, digest: &str) -> PathBuf {
        self.cache_dir.join(format!(".{digest}.part"))
    }

    /// Scan the directory and rewrite the metadata table from scratch.
    ///
    /// Dotfiles are skipped. `last_accessed` is taken from the file mtime so
    /// pre-existing blobs keep a sensible eviction order.
    pub async fn rebuild_from_directory(&self) -> Result<(), StoreError> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.cache_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if name.starts_with('.') {
                continue;
            }
            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let mtime_ms = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or_else(now_ms);

            records.push(BlobRecord {
                sha256: name,
                last_accessed: mtime_ms,
                size: meta.len() as i64,
                uploaded: Some(mtime_ms / 1000),
            });
        }

        self.db.replace_all(&records).await?;
        Ok(())
    }

    /// Open a blob file if it exists, refreshing `last_accessed` off the hot
    /// path. Returns the open file and its size.
    pub async fn lookup(self: &Arc<Self>, digest: &str) -> Option<(File, u64)> {
        let file = match File::open(self.blob_path(digest)).await {
            Ok(file) => file,
            Err(e) => {
                if e.kind() != ErrorKind::NotFound {
                    warn!("failed to open cached blob {digest}: {e}");
                }
                return None;
            }
        };
        let size = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("failed to stat cached blob {digest}: {e}");
                return None;
            }
        };

        let store = self.clone();
        let digest = digest.to_string();
        tokio::spawn(async move {
            store.touch(&digest, Some(size)).await;
        });

        Some((file, size))
    }

    /// Check for a blob file without opening it
    pub async fn contains(&self, digest: &str) -> bool {
        fs::try_exists(self.blob_path(digest)).await.unwrap_or(false)
    }

    /// Refresh `last_accessed`, preserving `uploaded`. When no row exists yet
    /// the size falls back to the file on disk; when the file is gone too
    /// this is a no-op. Errors are logged, never returned.
    pub async fn touch(&self, digest: &str, size: Option<u64>) {
        let now = now_ms();
        match self
            .db
            .touch_record(digest, now, size.map(|s| s as i64))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                let size = match size {
                    Some(size) => size,
                    None => match fs::metadata(self.blob_path(digest)).await {
                        Ok(meta) => meta.len(),
                        Err(_) => return,
                    },
                };
                let record = BlobRecord {
                    sha256: digest.to_string(),
                    last_accessed: now,
                    size: size as i64,
                    uploaded: None,
                };
                if let Err(e) = self.db.upsert_record(&record).await {
                    warn!("failed to insert metadata row for {digest}: {e}");
                }
            }
            Err(e) => warn!("failed to touch {digest}: {e}"),
        }
    }

    /// Total tracked bytes
    pub async fn size_total(&self) -> u64 {
        match self.db.total_size().await {
            Ok(total) => total.max(0) as u64,
            Err(e) => {
                warn!("failed to read cache size: {e}");
                0
            }
        }
    }

    /// Record metadata for a freshly written blob file and trigger a prune
    /// check without awaiting it.
    pub async fn write_and_record(self: &Arc<Self>, digest: &str, size: u64, uploaded: Option<i64>) {
        let record = BlobRecord {
            sha256: digest.to_string(),
            last_accessed: now_ms(),
            size: size as i64,
            uploaded,
        };
        if let Err(e) = self.db.upsert_record(&record).await {
            warn!("failed to record metadata for {digest}: {e}");
        }

        let store = self.clone();
        tokio::spawn(async move {
            store.prune_if_needed().await;
        });
    }

    /// Delete a blob file and its metadata row. True when either existed.
    pub async fn delete(&self, digest: &str) -> Result<bool, StoreError> {
        let file_existed = match fs::remove_file(self.blob_path(digest)).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(StoreError::Io(e)),
        };
        let row_existed = match self.db.delete_record(digest).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!("failed to delete metadata row for {digest}: {e}");
                false
            }
        };
        Ok(file_existed || row_existed)
    }

    /// When the blob was uploaded to us, in seconds since the epoch
    pub async fn get_uploaded(&self, digest: &str) -> Option<i64> {
        match self.db.get_uploaded(digest).await {
            Ok(uploaded) => uploaded,
            Err(e) => {
                warn!("failed to read uploaded timestamp for {digest}: {e}");
                None
            }
        }
    }

    /// Prune when a size ceiling is configured and exceeded. Skipped
    /// silently while the metadata database is unavailable.
    pub async fn prune_if_needed(&self) {
        let Some(max) = self.max_size else { return };
        let total = match self.db.total_size().await {
            Ok(total) => total.max(0) as u64,
            Err(_) => return,
        };
        if total > max {
            self.prune().await;
        }
    }

    /// Evict least-recently-accessed blobs down to 90% of the ceiling.
    ///
    /// A row is removed even when its file unlink fails so metadata never
    /// diverges from the directory.
    pub async fn prune(&self) {
        let Some(max) = self.max_size else { return };
        let total = match self.db.total_size().await {
            Ok(total) => total.max(0) as u64,
            Err(_) => return,
        };
        let target = max.saturating_mul(9) / 10;
        let mut to_free = total.saturating_sub(target);
        if to_free == 0 {
            return;
        }

        info!("cache size {total} over limit {max}, pruning to {target}");

        let mut removed = 0u64;
        let mut freed = 0u64;
        while to_free > 0 {
            let page = match self.db.lru_page(100).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("prune aborted, cannot read eviction candidates: {e}");
                    break;
                }
            };
            if page.is_empty() {
                break;
            }

            let mut progressed = false;
            for record in page {
                if to_free == 0 {
                    break;
                }
                if let Err(e) = fs::remove_file(self.blob_path(&record.sha256)).await {
                    if e.kind() != ErrorKind::NotFound {
                        warn!("failed to remove blob file {}: {e}", record.sha256);
                    }
                }
                match self.db.delete_record(&record.sha256).await {
                    Ok(true) => {
                        progressed = true;
                        removed += 1;
                        let size = record.size.max(0) as u64;
                        freed += size;
                        to_free = to_free.saturating_sub(size);
                        debug!("evicted {}", record.sha256);
                    }
                    Ok(false) => {}
                    Err(e) => warn!("failed to drop metadata row {}: {e}", record.sha256),
                }
            }
            if !progressed {
                break;
            }
        }

        info!("pruned {removed} blobs, {freed} bytes freed");
    }

    /// Create a dot-prefixed staging file for an upload in progress
    pub async fn create_staging(&self) -> Result<(File, PathBuf), StoreError> {
        self.ensure_dir().await?;
        let path = self.cache_dir.join(format!(".upload-{}", Uuid::new_v4()));
        let file = File::create(&path).await?;
        Ok((file, path))
    }

    /// Move a fully written staging file into place under its digest and
    /// record its metadata.
    pub async fn commit_staging(
        self: &Arc<Self>,
        staging: &Path,
        digest: &str,
        size: u64,
        uploaded: Option<i64>,
    ) -> Result<(), StoreError> {
        fs::rename(staging, self.blob_path(digest)).await?;
        self.write_and_record(digest, size, uploaded).await;
        Ok(())
    }

    /// Remove an abandoned staging file
    pub async fn discard_staging(&self, staging: &Path) {
        if let Err(e) = fs::remove_file(staging).await {
            if e.kind() != ErrorKind::NotFound {
                warn!("failed to remove staging file {staging:?}: {e}");
            }
        }
    }

    /// Counters for the status page
    pub async fn stats(&self) -> StoreStats {
        match self.db.stats().await {
            Ok(stats) => StoreStats {
                blob_count: stats.blob_count,
                total_size: stats.total_size,
            },
            Err(e) => {
                warn!("failed to read cache stats: {e}");
                StoreStats::default()
            }
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

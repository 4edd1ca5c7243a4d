//! Cache metadata repository

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

use crate::error::DbError;
use crate::models::BlobRecord;

/// Database connection and operations
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Aggregate counters for the status page
#[derive(Debug, Clone, Default)]
pub struct DbStats {
    pub blob_count: i64,
    pub total_size: i64,
}

impl Database {
    /// Open (creating if missing) the metadata database at `path`.
    ///
    /// Returns the database plus a flag indicating whether the schema had to
    /// be created or re-created, which callers use to trigger a directory
    /// rebuild.
    pub async fn open(path: &Path) -> Result<(Self, bool), DbError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let db = Self { pool };

        let mut fresh = !db.has_metadata_table().await?;
        if !fresh && !db.schema_is_readable().await {
            warn!("cache metadata schema is unreadable, recreating");
            sqlx::query("DROP TABLE IF EXISTS cache_metadata")
                .execute(&db.pool)
                .await?;
            fresh = true;
        }

        db.run_migrations().await?;
        Ok((db, fresh))
    }

    /// Get the underlying pool for advanced usage
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn has_metadata_table(&self) -> Result<bool, DbError> {
        let row = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'cache_metadata'",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn schema_is_readable(&self) -> bool {
        sqlx::query("SELECT sha256, last_accessed, size, uploaded FROM cache_metadata LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .is_ok()
    }

    async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_metadata (
                sha256 TEXT PRIMARY KEY,
                last_accessed INTEGER,
                size INTEGER,
                uploaded INTEGER NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_cache_metadata_last_accessed ON cache_metadata(last_accessed)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace a metadata row
    pub async fn upsert_record(&self, record: &BlobRecord) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO cache_metadata (sha256, last_accessed, size, uploaded)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(sha256) DO UPDATE SET
                last_accessed = excluded.last_accessed,
                size = excluded.size,
                uploaded = excluded.uploaded
            "#,
        )
        .bind(&record.sha256)
        .bind(record.last_accessed)
        .bind(record.size)
        .bind(record.uploaded)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Refresh `last_accessed` (and optionally `size`) for an existing row,
    /// preserving `uploaded`. Returns false when no row exists.
    pub async fn touch_record(
        &self,
        digest: &str,
        now_ms: i64,
        size: Option<i64>,
    ) -> Result<bool, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE cache_metadata
            SET last_accessed = ?, size = COALESCE(?, size)
            WHERE sha256 = ?
            "#,
        )
        .bind(now_ms)
        .bind(size)
        .bind(digest)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get a metadata row by digest
    pub async fn get_record(&self, digest: &str) -> Result<Option<BlobRecord>, DbError> {
        let result = sqlx::query(
            r#"
            SELECT sha256, last_accessed, size, uploaded
            FROM cache_metadata
            WHERE sha256 = ?
            "#,
        )
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result.map(|row| BlobRecord {
            sha256: row.get("sha256"),
            last_accessed: row.get("last_accessed"),
            size: row.get("size"),
            uploaded: row.get("uploaded"),
        }))
    }

    /// Get the `uploaded` timestamp (seconds) for a digest
    pub async fn get_uploaded(&self, digest: &str) -> Result<Option<i64>, DbError> {
        let result = sqlx::query("SELECT uploaded FROM cache_metadata WHERE sha256 = ?")
            .bind(digest)
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.and_then(|row| row.get("uploaded")))
    }

    /// Delete a metadata row by digest
    pub async fn delete_record(&self, digest: &str) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM cache_metadata WHERE sha256 = ?")
            .bind(digest)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get a page of rows in eviction order: `last_accessed` ascending,
    /// ties broken by digest ascending.
    pub async fn lru_page(&self, limit: i64) -> Result<Vec<BlobRecord>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT sha256, last_accessed, size, uploaded
            FROM cache_metadata
            ORDER BY last_accessed ASC, sha256 ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| BlobRecord {
                sha256: row.get("sha256"),
                last_accessed: row.get("last_accessed"),
                size: row.get("size"),
                uploaded: row.get("uploaded"),
            })
            .collect())
    }

    /// Get total tracked size in bytes
    pub async fn total_size(&self) -> Result<i64, DbError> {
        let result = sqlx::query("SELECT COALESCE(SUM(size), 0) as total FROM cache_metadata")
            .fetch_one(&self.pool)
            .await?;
        Ok(result.get("total"))
    }

    /// Get tracked row count
    pub async fn record_count(&self) -> Result<i64, DbError> {
        let result = sqlx::query("SELECT COUNT(*) as count FROM cache_metadata")
            .fetch_one(&self.pool)
            .await?;
        Ok(result.get("count"))
    }

    /// Replace the whole table with `records` in one transaction.
    ///
    /// Used by the startup rebuild scan, where the directory is the source
    /// of truth and any existing rows are stale.
    pub async fn replace_all(&self, records: &[BlobRecord]) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM cache_metadata")
            .execute(&mut *tx)
            .await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO cache_metadata (sha256, last_accessed, size, uploaded)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&record.sha256)
            .bind(record.last_accessed)
            .bind(record.size)
            .bind(record.uploaded)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("rebuilt cache metadata with {} rows", records.len());
        Ok(())
    }

    /// Get aggregate counters for the status page
    pub async fn stats(&self) -> Result<DbStats, DbError> {
        Ok(DbStats {
            blob_count: self.record_count().await?,
            total_size: self.total_size().await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let (db, fresh) = Database::open(&dir.path().join("meta.db")).await.unwrap();
        assert!(fresh);
        (db, dir)
    }

    fn record(digest: &str, last_accessed: i64, size: i64, uploaded: Option<i64>) -> BlobRecord {
        BlobRecord {
            sha256: digest.to_string(),
            last_accessed,
            size,
            uploaded,
        }
    }

    #[tokio::test]
    async fn upsert_and_get_round_trip() {
        let (db, _dir) = open_temp().await;

        let rec = record("a".repeat(64).as_str(), 1_000, 42, Some(7));
        db.upsert_record(&rec).await.unwrap();

        let got = db.get_record(&rec.sha256).await.unwrap().unwrap();
        assert_eq!(got, rec);
        assert_eq!(db.get_uploaded(&rec.sha256).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn touch_preserves_uploaded() {
        let (db, _dir) = open_temp().await;

        let rec = record(&"b".repeat(64), 1_000, 42, Some(7));
        db.upsert_record(&rec).await.unwrap();

        assert!(db.touch_record(&rec.sha256, 2_000, None).await.unwrap());
        let got = db.get_record(&rec.sha256).await.unwrap().unwrap();
        assert_eq!(got.last_accessed, 2_000);
        assert_eq!(got.size, 42);
        assert_eq!(got.uploaded, Some(7));

        // size argument overrides the stored size
        assert!(db.touch_record(&rec.sha256, 3_000, Some(50)).await.unwrap());
        let got = db.get_record(&rec.sha256).await.unwrap().unwrap();
        assert_eq!(got.size, 50);
        assert_eq!(got.uploaded, Some(7));
    }

    #[tokio::test]
    async fn touch_missing_row_reports_false() {
        let (db, _dir) = open_temp().await;
        assert!(!db.touch_record(&"c".repeat(64), 1_000, None).await.unwrap());
    }

    #[tokio::test]
    async fn lru_page_orders_by_access_then_digest() {
        let (db, _dir) = open_temp().await;

        db.upsert_record(&record(&"b".repeat(64), 200, 1, None))
            .await
            .unwrap();
        db.upsert_record(&record(&"c".repeat(64), 100, 1, None))
            .await
            .unwrap();
        // same last_accessed as "c": digest order decides
        db.upsert_record(&record(&"a".repeat(64), 100, 1, None))
            .await
            .unwrap();

        let page = db.lru_page(10).await.unwrap();
        let digests: Vec<&str> = page.iter().map(|r| r.sha256.as_str()).collect();
        assert_eq!(
            digests,
            vec!["a".repeat(64), "c".repeat(64), "b".repeat(64)]
        );
    }

    #[tokio::test]
    async fn totals_and_delete() {
        let (db, _dir) = open_temp().await;

        db.upsert_record(&record(&"a".repeat(64), 1, 400, None))
            .await
            .unwrap();
        db.upsert_record(&record(&"b".repeat(64), 2, 300, None))
            .await
            .unwrap();

        assert_eq!(db.total_size().await.unwrap(), 700);
        assert_eq!(db.record_count().await.unwrap(), 2);

        assert!(db.delete_record(&"a".repeat(64)).await.unwrap());
        assert!(!db.delete_record(&"a".repeat(64)).await.unwrap());
        assert_eq!(db.total_size().await.unwrap(), 300);
    }

    #[tokio::test]
    async fn replace_all_swaps_the_table() {
        let (db, _dir) = open_temp().await;

        db.upsert_record(&record(&"a".repeat(64), 1, 400, None))
            .await
            .unwrap();
        db.replace_all(&[
            record(&"d".repeat(64), 5, 10, Some(1)),
            record(&"e".repeat(64), 6, 20, Some(2)),
        ])
        .await
        .unwrap();

        assert!(db.get_record(&"a".repeat(64)).await.unwrap().is_none());
        assert_eq!(db.record_count().await.unwrap(), 2);
        assert_eq!(db.total_size().await.unwrap(), 30);
    }

    #[tokio::test]
    async fn reopen_is_not_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.db");

        let (db, fresh) = Database::open(&path).await.unwrap();
        assert!(fresh);
        db.upsert_record(&record(&"a".repeat(64), 1, 400, None))
            .await
            .unwrap();
        drop(db);

        let (db, fresh) = Database::open(&path).await.unwrap();
        assert!(!fresh);
        assert_eq!(db.record_count().await.unwrap(), 1);
    }
}

//! Amber Cache metadata layer
//!
//! This crate provides the cache metadata database for Amber Cache,
//! using SQLite via sqlx for persistence.

pub mod error;
pub mod models;
pub mod repository;

pub use error::DbError;
pub use models::BlobRecord;
pub use repository::{Database, DbStats};

/// Re-export sqlx types for convenience
pub use sqlx::SqlitePool;

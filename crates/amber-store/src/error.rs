//! Store error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Db(#[from] amber_db::DbError),

    #[error("Upstream stream error: {0}")]
    Upstream(String),
}

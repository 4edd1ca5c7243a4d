//! Amber Cache blob store
//!
//! Owns the on-disk blob directory and its metadata database, and provides
//! the hash-while-caching stream tee used by the fetch pipeline.

pub mod digest;
pub mod error;
pub mod store;
pub mod stream;

pub use error::StoreError;
pub use store::{BlobStore, StoreStats};
pub use stream::{ByteStream, TeeHandles, hash_and_cache};

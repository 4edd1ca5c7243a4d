//! Amber Cache core
//!
//! The fetch-validate-cache-serve pipeline: parsed blob requests, the
//! buffered fan-out stream, the in-flight deduplicator, and the service that
//! ties the store, resolver, and fetcher together.

pub mod flight;
pub mod request;
pub mod service;
pub mod shared;

pub use flight::{FetchHandle, Inflight};
pub use request::{BlobRequest, parse_blob_path};
pub use service::BlobService;
pub use shared::SharedStream;

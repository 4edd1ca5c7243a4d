//! Amber Cache upstream access
//!
//! HTTP client for candidate blob servers, candidate list resolution, and
//! the author-server directory lookup boundary.

pub mod authors;
pub mod client;
pub mod error;
pub mod resolver;

pub use authors::{AuthorIndex, HttpAuthorIndex};
pub use client::{Candidate, FetchClient, FetchConfig, UpstreamBlob};
pub use error::FetchError;
pub use resolver::ServerResolver;

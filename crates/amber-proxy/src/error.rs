//! Upstream fetch error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Timed out")]
    Timeout,

    #[error("Too many redirects (limit {0})")]
    TooManyRedirects(usize),

    #[error("Redirect target dropped the digest: {0}")]
    RedirectRejected(String),

    #[error("Upstream returned status {0}")]
    Status(u16),
}

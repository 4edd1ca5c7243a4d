//! Upstream blob fetcher
//!
//! Issues plain GETs against candidate servers. Redirects are followed
//! manually so each hop can be checked: a redirect that drops the requested
//! digest from the URL is refused, which blocks digest swaps via Location
//! headers. The proxy always requests the full object so the digest can be
//! verified end to end.

use std::time::Duration;

use amber_store::{ByteStream, StoreError};
use futures::StreamExt;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Client, StatusCode, redirect};
use tracing::{debug, warn};
use url::Url;

use crate::error::FetchError;

/// Fetcher configuration
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-request deadline
    pub request_timeout: Duration,
    /// Redirect hops followed before giving up
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_redirects: 5,
        }
    }
}

/// A candidate upstream URL.
///
/// `allow_http_fallback` is set for servers that arrived as bare hostnames:
/// those were promoted to https and may be retried over http once when the
/// https attempt fails at the transport level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: Url,
    pub allow_http_fallback: bool,
}

/// A successful upstream response
pub struct UpstreamBlob {
    pub stream: ByteStream,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

impl std::fmt::Debug for UpstreamBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamBlob")
            .field("stream", &"<stream>")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish()
    }
}

/// Upstream HTTP client
#[derive(Clone)]
pub struct FetchClient {
    client: Client,
    config: FetchConfig,
}

impl FetchClient {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()?;
        Ok(Self { client, config })
    }

    /// Fetch `digest` from one candidate server.
    ///
    /// The request goes to `<server>/<digest><.ext>`; 200 and 206 are
    /// accepted, anything else is a failure the caller treats as "try the
    /// next candidate".
    pub async fn fetch(
        &self,
        candidate: &Candidate,
        digest: &str,
        extension: Option<&str>,
    ) -> Result<UpstreamBlob, FetchError> {
        let url = blob_url(&candidate.url, digest, extension)?;

        match self.fetch_url(url.clone(), digest).await {
            Err(FetchError::Http(e))
                if candidate.allow_http_fallback
                    && url.scheme() == "https"
                    && is_transport_error(&e) =>
            {
                let mut http_url = url;
                if http_url.set_scheme("http").is_err() {
                    return Err(FetchError::Http(e));
                }
                debug!("https attempt failed ({e}), retrying {http_url} over http");
                self.fetch_url(http_url, digest).await
            }
            other => other,
        }
    }

    async fn fetch_url(&self, mut url: Url, digest: &str) -> Result<UpstreamBlob, FetchError> {
        for _hop in 0..=self.config.max_redirects {
            let response = self
                .client
                .get(url.clone())
                .timeout(self.config.request_timeout)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        FetchError::Timeout
                    } else {
                        FetchError::Http(e)
                    }
                })?;

            let status = response.status();

            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| FetchError::RedirectRejected("missing Location".into()))?;
                let next = url
                    .join(location)
                    .map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
                // a redirect may only be followed while it still names the
                // digest we asked for
                if !next.as_str().contains(digest) {
                    warn!("refusing redirect from {url} to {next}");
                    return Err(FetchError::RedirectRejected(next.to_string()));
                }
                debug!("following redirect {url} -> {next}");
                url = next;
                continue;
            }

            if status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT {
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let content_length = response.content_length();
                let stream: ByteStream = Box::pin(
                    response
                        .bytes_stream()
                        .map(|r| r.map_err(|e| StoreError::Upstream(e.to_string()))),
                );
                return Ok(UpstreamBlob {
                    stream,
                    content_type,
                    content_length,
                });
            }

            return Err(FetchError::Status(status.as_u16()));
        }

        Err(FetchError::TooManyRedirects(self.config.max_redirects))
    }
}

/// Build `<server>/<digest><.ext>` against a candidate base URL
fn blob_url(base: &Url, digest: &str, extension: Option<&str>) -> Result<Url, FetchError> {
    let trimmed = base.as_str().trim_end_matches('/');
    let raw = match extension {
        Some(ext) => format!("{trimmed}/{digest}.{ext}"),
        None => format!("{trimmed}/{digest}"),
    };
    Url::parse(&raw).map_err(|e| FetchError::InvalidUrl(e.to_string()))
}

fn is_transport_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_request()
}

//! Author-server directory lookup
//!
//! Best-effort lookup of the servers an author publishes their blobs on.
//! Failures never fail a request; they only shrink the candidate list.

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::FetchError;

/// Directory that maps an author pubkey to the servers hosting their blobs
#[async_trait]
pub trait AuthorIndex: Send + Sync {
    async fn servers_for(&self, pubkey: &str) -> Result<Vec<String>, FetchError>;
}

/// Queries each configured lookup relay at `<relay>/servers/<pubkey>` and
/// merges the JSON arrays of server URLs they return.
pub struct HttpAuthorIndex {
    client: reqwest::Client,
    relays: Vec<Url>,
}

impl HttpAuthorIndex {
    pub fn new(relays: Vec<Url>) -> Result<Self, FetchError> {
        Ok(Self {
            client: reqwest::Client::new(),
            relays,
        })
    }
}

#[async_trait]
impl AuthorIndex for HttpAuthorIndex {
    async fn servers_for(&self, pubkey: &str) -> Result<Vec<String>, FetchError> {
        let mut servers = Vec::new();

        for relay in &self.relays {
            let url = match join_relay(relay, pubkey) {
                Ok(url) => url,
                Err(e) => {
                    debug!("skipping relay {relay}: {e}");
                    continue;
                }
            };

            match self.client.get(url.clone()).send().await {
                Ok(response) if response.status().is_success() => {
                    match response.json::<Vec<String>>().await {
                        Ok(list) => servers.extend(list),
                        Err(e) => debug!("bad payload from {url}: {e}"),
                    }
                }
                Ok(response) => debug!("relay {url} answered {}", response.status()),
                Err(e) => debug!("relay {url} unreachable: {e}"),
            }
        }

        Ok(servers)
    }
}

fn join_relay(relay: &Url, pubkey: &str) -> Result<Url, FetchError> {
    let mut base = relay.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    base.join(&format!("servers/{pubkey}"))
        .map_err(|e| FetchError::InvalidUrl(e.to_string()))
}

//! Blob fetch orchestration
//!
//! Ties the candidate resolver, the upstream fetcher, the hash+cache tee,
//! and the in-flight deduplicator into the miss path: resolve candidates,
//! try them in order, and fan the one winning stream out to every waiting
//! requester while it is verified and written to the cache.

use std::sync::Arc;

use amber_proxy::{FetchClient, ServerResolver, UpstreamBlob};
use amber_store::{BlobStore, hash_and_cache};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::flight::{FetchHandle, Inflight};
use crate::request::BlobRequest;
use crate::shared::SharedStream;

/// Orchestrates cache misses
pub struct BlobService {
    store: Arc<BlobStore>,
    fetcher: FetchClient,
    resolver: ServerResolver,
    inflight: Arc<Inflight>,
}

impl BlobService {
    pub fn new(store: Arc<BlobStore>, fetcher: FetchClient, resolver: ServerResolver) -> Arc<Self> {
        Arc::new(Self {
            store,
            fetcher,
            resolver,
            inflight: Inflight::new(),
        })
    }

    pub fn store(&self) -> &Arc<BlobStore> {
        &self.store
    }

    /// Fetch a blob through the in-flight deduplicator. None means no
    /// candidate server produced the blob.
    pub async fn fetch_blob(&self, request: &BlobRequest) -> Option<Arc<FetchHandle>> {
        let produce = produce_flight(
            self.store.clone(),
            self.fetcher.clone(),
            self.resolver.clone(),
            request.clone(),
        );
        self.inflight.get_or_create(&request.digest, produce).await
    }
}

/// One-shot fetch: resolve the candidate list and try servers in order until
/// one streams
async fn produce_flight(
    store: Arc<BlobStore>,
    fetcher: FetchClient,
    resolver: ServerResolver,
    request: BlobRequest,
) -> Option<Arc<FetchHandle>> {
    let candidates = resolver
        .resolve(&request.server_hints, &request.authors)
        .await;
    if candidates.is_empty() {
        debug!("no candidate servers for {}", request.digest);
        return None;
    }

    for candidate in &candidates {
        match fetcher
            .fetch(candidate, &request.digest, request.extension.as_deref())
            .await
        {
            Ok(blob) => {
                info!("streaming {} from {}", request.digest, candidate.url);
                return Some(spool(store, request.digest.clone(), blob));
            }
            Err(e) => {
                debug!("candidate {} failed for {}: {e}", candidate.url, request.digest);
            }
        }
    }

    warn!(
        "all {} candidates failed for {}",
        candidates.len(),
        request.digest
    );
    None
}

/// Wire an upstream response through the hash+cache tee and into a shared
/// fan-out buffer.
///
/// The pump task drains the tee no matter how many subscribers exist, which
/// is what lets a HEAD request or a disconnected client still fill the
/// cache.
fn spool(store: Arc<BlobStore>, digest: String, blob: UpstreamBlob) -> Arc<FetchHandle> {
    let tee = hash_and_cache(store, digest.clone(), blob.stream);
    let shared = SharedStream::new();
    let (hash_tx, hash_rx) = watch::channel(None);
    let (written_tx, written_rx) = watch::channel(false);

    let pump = shared.clone();
    let mut verified = tee.stream;
    tokio::spawn(async move {
        while let Some(item) = verified.next().await {
            match item {
                Ok(chunk) => pump.push(chunk),
                Err(e) => {
                    pump.finish(Err(e.to_string()));
                    return;
                }
            }
        }
        pump.finish(Ok(()));
    });

    let hash_valid = tee.hash_valid;
    tokio::spawn(async move {
        let valid = hash_valid.await.unwrap_or(false);
        let _ = hash_tx.send(Some(valid));
    });

    let cache_written = tee.cache_written;
    tokio::spawn(async move {
        let _ = cache_written.await;
        let _ = written_tx.send(true);
    });

    Arc::new(FetchHandle::new(
        digest,
        blob.content_type,
        blob.content_length,
        shared,
        hash_rx,
        written_rx,
    ))
}

//! In-flight fetch deduplication
//!
//! At most one upstream fetch runs per digest. The first requester inserts a
//! shared produce future into the map; everyone who arrives while it is in
//! flight awaits the same future and gets the same handle. A detached driver
//! task keeps the future moving, so the fetch (and the cache fill behind it)
//! completes even when every requester has gone away.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use amber_store::ByteStream;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::shared::SharedStream;

/// Shared state of one in-flight fetch.
///
/// Handed to every requester that joined the flight. The handle stays usable
/// after the flight leaves the dedup map: the buffered stream and the
/// latches live as long as anyone holds the Arc.
pub struct FetchHandle {
    pub digest: String,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    stream: SharedStream,
    hash_valid: watch::Receiver<Option<bool>>,
    cache_written: watch::Receiver<bool>,
}

impl FetchHandle {
    pub fn new(
        digest: String,
        content_type: Option<String>,
        content_length: Option<u64>,
        stream: SharedStream,
        hash_valid: watch::Receiver<Option<bool>>,
        cache_written: watch::Receiver<bool>,
    ) -> Self {
        Self {
            digest,
            content_type,
            content_length,
            stream,
            hash_valid,
            cache_written,
        }
    }

    /// A fresh reader over the full transfer
    pub fn subscribe(&self) -> ByteStream {
        self.stream.subscribe()
    }

    /// Wait for the digest verdict. A producer that dies without reporting
    /// counts as invalid.
    pub async fn hash_valid(&self) -> bool {
        let mut rx = self.hash_valid.clone();
        match rx.wait_for(|v| v.is_some()).await {
            Ok(value) => (*value).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Wait until the cache writer has finished (successfully or not)
    pub async fn cache_written(&self) {
        let mut rx = self.cache_written.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}

type FlightFuture = Shared<BoxFuture<'static, Option<Arc<FetchHandle>>>>;

/// Digest-keyed map of in-flight fetches
pub struct Inflight {
    flights: Mutex<HashMap<String, FlightFuture>>,
}

impl Inflight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            flights: Mutex::new(HashMap::new()),
        })
    }

    /// True when no fetch is currently in flight
    pub fn is_empty(&self) -> bool {
        self.flights.lock().is_empty()
    }

    /// Join the in-flight fetch for `digest`, creating it from `produce` when
    /// none exists. The map entry is removed when `produce` settles,
    /// regardless of outcome; handles obtained before removal stay readable.
    pub async fn get_or_create<F>(
        self: &Arc<Self>,
        digest: &str,
        produce: F,
    ) -> Option<Arc<FetchHandle>>
    where
        F: Future<Output = Option<Arc<FetchHandle>>> + Send + 'static,
    {
        let flight = {
            let mut flights = self.flights.lock();
            if let Some(existing) = flights.get(digest) {
                existing.clone()
            } else {
                let registry = self.clone();
                let key = digest.to_string();
                let flight: FlightFuture = async move {
                    let result = produce.await;
                    registry.flights.lock().remove(&key);
                    result
                }
                .boxed()
                .shared();

                flights.insert(digest.to_string(), flight.clone());
                // detached driver: the flight makes progress even if every
                // requester drops its copy of the future
                tokio::spawn(flight.clone());
                flight
            }
        };

        flight.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn handle_named(digest: &str) -> Arc<FetchHandle> {
        let stream = SharedStream::new();
        stream.finish(Ok(()));
        let (_hv_tx, hv_rx) = watch::channel(Some(true));
        let (_cw_tx, cw_rx) = watch::channel(true);
        Arc::new(FetchHandle::new(
            digest.to_string(),
            None,
            None,
            stream,
            hv_rx,
            cw_rx,
        ))
    }

    #[tokio::test]
    async fn concurrent_requesters_share_one_produce() {
        let inflight = Inflight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let digest = "a".repeat(64);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let inflight = inflight.clone();
            let calls = calls.clone();
            let digest = digest.clone();
            tasks.push(tokio::spawn(async move {
                let digest_for_handle = digest.clone();
                inflight
                    .get_or_create(&digest, async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Some(handle_named(&digest_for_handle))
                    })
                    .await
            }));
        }

        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn entry_is_removed_after_failure_so_retries_are_fresh() {
        let inflight = Inflight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let digest = "b".repeat(64);

        for _ in 0..2 {
            let calls = calls.clone();
            let result = inflight
                .get_or_create(&digest, async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    None
                })
                .await;
            assert!(result.is_none());
        }

        // both attempts ran: the failed flight did not linger in the map
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(inflight.is_empty());
    }

    #[tokio::test]
    async fn flight_completes_without_any_awaiting_requester() {
        let inflight = Inflight::new();
        let done = Arc::new(AtomicUsize::new(0));
        let digest = "c".repeat(64);

        // start a requester, then cancel it mid-flight
        let requester = tokio::spawn({
            let inflight = inflight.clone();
            let digest = digest.clone();
            let done = done.clone();
            async move {
                inflight
                    .get_or_create(&digest, async move {
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        done.fetch_add(1, Ordering::SeqCst);
                        None
                    })
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        requester.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(inflight.is_empty());
    }
}

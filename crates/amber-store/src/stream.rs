//! Hash-while-caching stream tee

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::BlobStore;

/// Type alias for a boxed stream of bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StoreError>> + Send>>;

/// Handles returned by [`hash_and_cache`]
pub struct TeeHandles {
    /// Pass-through copy of the upstream bytes
    pub stream: ByteStream,
    /// Resolves to whether the finalized hash matched the expected digest.
    /// Resolves after `cache_written`, once every byte has flowed through.
    pub hash_valid: oneshot::Receiver<bool>,
    /// Resolves once the cache writer is done, successfully or not
    pub cache_written: oneshot::Receiver<()>,
}

/// Wrap `source` so every chunk updates an incremental SHA-256, is appended
/// to an in-progress cache file, and is re-emitted unchanged.
///
/// The bytes land in a dot-prefixed temp file that is renamed into place only
/// when the finalized hash matches `digest`, so neither a mid-stream failure
/// nor a lying upstream can leave a poisoned cache entry. A cache-write
/// failure is recoverable: the file is given up and the bytes keep flowing to
/// the returned stream.
pub fn hash_and_cache(store: Arc<BlobStore>, digest: String, source: ByteStream) -> TeeHandles {
    let (tx, rx) = mpsc::channel::<Result<Bytes, StoreError>>(8);
    let (hash_tx, hash_rx) = oneshot::channel();
    let (written_tx, written_rx) = oneshot::channel();

    tokio::spawn(async move {
        let part = store.part_path(&digest);
        let mut sink = match File::create(&part).await {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("cannot open cache file for {digest}: {e}");
                None
            }
        };
        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut source = source;

        while let Some(item) = source.next().await {
            match item {
                Ok(chunk) => {
                    hasher.update(&chunk);
                    size += chunk.len() as u64;
                    if let Some(file) = sink.as_mut() {
                        if let Err(e) = file.write_all(&chunk).await {
                            warn!("cache write for {digest} failed: {e}");
                            sink = None;
                            let _ = fs::remove_file(&part).await;
                        }
                    }
                    if tx.send(Ok(chunk)).await.is_err() {
                        // reader detached; keep draining so the cache still fills
                        debug!("subscriber detached during fetch of {digest}");
                    }
                }
                Err(e) => {
                    if sink.take().is_some() {
                        let _ = fs::remove_file(&part).await;
                    }
                    let _ = tx.send(Err(e)).await;
                    let _ = written_tx.send(());
                    let _ = hash_tx.send(false);
                    return;
                }
            }
        }

        let actual = hex::encode(hasher.finalize());
        let valid = actual.eq_ignore_ascii_case(&digest);
        if !valid {
            warn!("digest mismatch from upstream: expected {digest}, got {actual}");
        }

        if let Some(mut file) = sink.take() {
            let flushed = file.flush().await.is_ok();
            drop(file);
            if valid && flushed {
                match fs::rename(&part, store.blob_path(&digest)).await {
                    Ok(()) => store.write_and_record(&digest, size, None).await,
                    Err(e) => {
                        warn!("failed to move cache file for {digest}: {e}");
                        let _ = fs::remove_file(&part).await;
                    }
                }
            } else {
                let _ = fs::remove_file(&part).await;
            }
        }

        let _ = written_tx.send(());
        let _ = hash_tx.send(valid);
    });

    TeeHandles {
        stream: Box::pin(ReceiverStream::new(rx)),
        hash_valid: hash_rx,
        cache_written: written_rx,
    }
}

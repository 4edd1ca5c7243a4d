//! Buffered fan-out stream
//!
//! A single producer appends chunks; any number of subscribers read them
//! independently, each from offset zero. The buffer keeps every chunk for the
//! lifetime of the transfer, so a subscriber attaching at any point before
//! EOF observes the same bytes in the same order as every other subscriber,
//! and a subscriber that stops reading (or is dropped) cannot stall anyone
//! else.

use std::sync::Arc;

use amber_store::{ByteStream, StoreError};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

struct Buffer {
    chunks: Vec<Bytes>,
    done: Option<Result<(), String>>,
}

struct Inner {
    buffer: Mutex<Buffer>,
    wake: watch::Sender<u64>,
}

/// Shared append-only chunk buffer with subscriber fan-out
#[derive(Clone)]
pub struct SharedStream {
    inner: Arc<Inner>,
}

impl SharedStream {
    pub fn new() -> Self {
        let (wake, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Buffer {
                    chunks: Vec::new(),
                    done: None,
                }),
                wake,
            }),
        }
    }

    /// Append a chunk and wake waiting subscribers
    pub fn push(&self, chunk: Bytes) {
        {
            let mut buffer = self.inner.buffer.lock();
            if buffer.done.is_some() {
                return;
            }
            buffer.chunks.push(chunk);
        }
        self.inner.wake.send_modify(|v| *v += 1);
    }

    /// Mark EOF (or a terminal stream error) and wake subscribers
    pub fn finish(&self, result: Result<(), String>) {
        {
            let mut buffer = self.inner.buffer.lock();
            if buffer.done.is_some() {
                return;
            }
            buffer.done = Some(result);
        }
        self.inner.wake.send_modify(|v| *v += 1);
    }

    /// A new independent reader starting at offset zero
    pub fn subscribe(&self) -> ByteStream {
        struct Cursor {
            inner: Arc<Inner>,
            rx: watch::Receiver<u64>,
            next: usize,
            finished: bool,
        }

        let cursor = Cursor {
            inner: self.inner.clone(),
            rx: self.inner.wake.subscribe(),
            next: 0,
            finished: false,
        };

        Box::pin(futures::stream::unfold(cursor, |mut cursor| async move {
            if cursor.finished {
                return None;
            }
            loop {
                // mark the current wake version as seen before inspecting the
                // buffer, so a push between the check and the await below
                // still wakes us
                let _ = cursor.rx.borrow_and_update();
                {
                    let buffer = cursor.inner.buffer.lock();
                    if cursor.next < buffer.chunks.len() {
                        let chunk = buffer.chunks[cursor.next].clone();
                        drop(buffer);
                        cursor.next += 1;
                        return Some((Ok(chunk), cursor));
                    }
                    let result = match &buffer.done {
                        Some(Ok(())) => Some(None),
                        Some(Err(message)) => Some(Some(StoreError::Upstream(message.clone()))),
                        None => None,
                    };
                    drop(buffer);
                    match result {
                        Some(None) => return None,
                        Some(Some(err)) => {
                            cursor.finished = true;
                            return Some((Err(err), cursor));
                        }
                        None => {}
                    }
                }
                if cursor.rx.changed().await.is_err() {
                    // producer vanished without finishing
                    let err = StoreError::Upstream("transfer abandoned".to_string());
                    cursor.finished = true;
                    return Some((Err(err), cursor));
                }
            }
        }))
    }
}

impl Default for SharedStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect_ok(stream: ByteStream) -> Vec<u8> {
        stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flat_map(|r| r.unwrap().to_vec())
            .collect()
    }

    #[tokio::test]
    async fn subscribers_see_identical_bytes() {
        let shared = SharedStream::new();
        let a = shared.subscribe();
        let b = shared.subscribe();

        shared.push(Bytes::from_static(b"one"));
        shared.push(Bytes::from_static(b"two"));
        shared.finish(Ok(()));

        assert_eq!(collect_ok(a).await, b"onetwo");
        assert_eq!(collect_ok(b).await, b"onetwo");
    }

    #[tokio::test]
    async fn late_subscriber_reads_from_offset_zero() {
        let shared = SharedStream::new();
        shared.push(Bytes::from_static(b"early "));

        let late = shared.subscribe();
        shared.push(Bytes::from_static(b"late"));
        shared.finish(Ok(()));

        assert_eq!(collect_ok(late).await, b"early late");
    }

    #[tokio::test]
    async fn subscriber_blocks_until_pushed() {
        let shared = SharedStream::new();
        let mut sub = shared.subscribe();

        let producer = shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            producer.push(Bytes::from_static(b"data"));
            producer.finish(Ok(()));
        });

        assert_eq!(sub.next().await.unwrap().unwrap(), Bytes::from_static(b"data"));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn error_finish_surfaces_once_then_ends() {
        let shared = SharedStream::new();
        let mut sub = shared.subscribe();

        shared.push(Bytes::from_static(b"partial"));
        shared.finish(Err("connection reset".to_string()));

        assert!(sub.next().await.unwrap().is_ok());
        assert!(sub.next().await.unwrap().is_err());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_one_subscriber_does_not_affect_another() {
        let shared = SharedStream::new();
        let dropped = shared.subscribe();
        let kept = shared.subscribe();
        drop(dropped);

        shared.push(Bytes::from_static(b"still here"));
        shared.finish(Ok(()));

        assert_eq!(collect_ok(kept).await, b"still here");
    }
}

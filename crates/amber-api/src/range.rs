//! Range header parsing and stream slicing

use amber_store::ByteStream;
use futures::StreamExt;

/// Parse `bytes=start-[end]` against a known total length.
///
/// Returns the inclusive byte interval, or None when the header is malformed
/// or names an unsatisfiable interval (start beyond the end of the blob, end
/// beyond the last byte, start past end).
pub fn parse_range(header: &str, total: u64) -> Option<(u64, u64)> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;

    let start: u64 = start.trim().parse().ok()?;
    let end: u64 = match end.trim() {
        "" => total.checked_sub(1)?,
        text => text.parse().ok()?,
    };

    if start >= total || end >= total || start > end {
        return None;
    }
    Some((start, end))
}

/// Slice `start..=end` out of a byte stream.
///
/// Discards the first `start` bytes, emits exactly `end - start + 1`, then
/// ends, dropping the inner stream. That cancels only this reader's branch.
pub fn slice_stream(inner: ByteStream, start: u64, end: u64) -> ByteStream {
    struct Slicer {
        inner: ByteStream,
        skip: u64,
        remaining: u64,
    }

    let slicer = Slicer {
        inner,
        skip: start,
        remaining: end - start + 1,
    };

    Box::pin(futures::stream::unfold(slicer, |mut slicer| async move {
        if slicer.remaining == 0 {
            return None;
        }
        while let Some(item) = slicer.inner.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) => {
                    slicer.remaining = 0;
                    return Some((Err(e), slicer));
                }
            };

            let len = chunk.len() as u64;
            if slicer.skip >= len {
                slicer.skip -= len;
                continue;
            }

            let begin = slicer.skip as usize;
            slicer.skip = 0;
            let take = (len - begin as u64).min(slicer.remaining) as usize;
            slicer.remaining -= take as u64;
            return Some((Ok(chunk.slice(begin..begin + take)), slicer));
        }
        None
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use amber_store::StoreError;
    use bytes::Bytes;

    #[test]
    fn parses_bounded_and_open_ended_ranges() {
        assert_eq!(parse_range("bytes=1-3", 6), Some((1, 3)));
        assert_eq!(parse_range("bytes=0-5", 6), Some((0, 5)));
        assert_eq!(parse_range("bytes=2-", 6), Some((2, 5)));
        assert_eq!(parse_range(" bytes=0-0 ", 6), Some((0, 0)));
    }

    #[test]
    fn rejects_unsatisfiable_and_malformed_ranges() {
        assert_eq!(parse_range("bytes=10-20", 6), None);
        assert_eq!(parse_range("bytes=0-6", 6), None);
        assert_eq!(parse_range("bytes=4-2", 6), None);
        assert_eq!(parse_range("bytes=6-", 6), None);
        assert_eq!(parse_range("bytes=-3", 6), None);
        assert_eq!(parse_range("bytes=a-b", 6), None);
        assert_eq!(parse_range("chunks=0-1", 6), None);
        assert_eq!(parse_range("bytes=0-", 0), None);
    }

    fn stream_of(chunks: &[&'static [u8]]) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c)))
                .collect::<Vec<Result<Bytes, StoreError>>>(),
        ))
    }

    async fn collect(stream: ByteStream) -> Vec<u8> {
        stream
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flat_map(|r| r.unwrap().to_vec())
            .collect()
    }

    #[tokio::test]
    async fn slices_across_chunk_boundaries() {
        let stream = stream_of(&[b"he", b"ll", b"o\n"]);
        assert_eq!(collect(slice_stream(stream, 1, 3)).await, b"ell");
    }

    #[tokio::test]
    async fn slice_of_everything_is_identity() {
        let stream = stream_of(&[b"hello\n"]);
        assert_eq!(collect(slice_stream(stream, 0, 5)).await, b"hello\n");
    }

    #[tokio::test]
    async fn slice_stops_reading_once_satisfied() {
        // the second chunk never needs to be touched
        let stream = stream_of(&[b"abcd", b"efgh"]);
        assert_eq!(collect(slice_stream(stream, 0, 1)).await, b"ab");
    }

    #[tokio::test]
    async fn skip_can_span_whole_chunks() {
        let stream = stream_of(&[b"ab", b"cd", b"ef"]);
        assert_eq!(collect(slice_stream(stream, 4, 5)).await, b"ef");
    }
}

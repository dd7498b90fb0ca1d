use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};
use std::{io, mem};

use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;
use tokio::io::ReadBuf;

use crate::{ByteRange, RangeBody};

const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Response body stream for one contiguous window. Implements [`Stream`], [`Body`], and [`IntoResponse`].
#[pin_project]
pub struct RangedStream<B> {
    state: StreamState,
    length: u64,
    #[pin]
    body: B,
}

impl<B: RangeBody + Send + 'static> RangedStream<B> {
    pub(crate) fn new(body: B, start: u64, length: u64) -> Self {
        RangedStream {
            state: StreamState::Seek { start },
            length,
            body,
        }
    }
}

impl<B> std::fmt::Debug for RangedStream<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangedStream")
            .field("state", &self.state)
            .field("length", &self.length)
            .finish()
    }
}

#[derive(Debug)]
enum StreamState {
    Seek { start: u64 },
    Seeking { remaining: u64 },
    Reading { buffer: BytesMut, remaining: u64 },
}

impl<B: RangeBody + Send + 'static> IntoResponse for RangedStream<B> {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl<B: RangeBody> Body for RangedStream<B> {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.length)
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl<B: RangeBody> Stream for RangedStream<B> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let mut this = self.project();

        if let StreamState::Seek { start } = *this.state {
            match this.body.as_mut().start_seek(start) {
                Err(e) => { return Poll::Ready(Some(Err(e))); }
                Ok(()) => {
                    let remaining = *this.length;
                    *this.state = StreamState::Seeking { remaining };
                }
            }
        }

        if let StreamState::Seeking { remaining } = *this.state {
            match this.body.as_mut().poll_complete(cx) {
                Poll::Pending => { return Poll::Pending; }
                Poll::Ready(Err(e)) => { return Poll::Ready(Some(Err(e))); }
                Poll::Ready(Ok(())) => {
                    let buffer = allocate_buffer();
                    *this.state = StreamState::Reading { buffer, remaining };
                }
            }
        }

        let StreamState::Reading { buffer, remaining } = this.state else {
            unreachable!();
        };

        if *remaining == 0 {
            return Poll::Ready(None);
        }

        poll_read_chunk(this.body, cx, buffer, remaining).map(Some)
    }
}

/// `multipart/byteranges` body, one part per range in the order given.
/// Implements [`Stream`], [`Body`], and [`IntoResponse`].
///
/// Every part is read on its own, overlapping ranges are emitted twice.
#[pin_project]
pub struct MultipartStream<B> {
    state: MultipartState,
    ranges: Vec<ByteRange>,
    current_range_index: usize,
    total_size: u64,
    content_type: String,
    boundary: String,
    content_length: u64,
    #[pin]
    body: B,
}

impl<B: RangeBody + Send + 'static> MultipartStream<B> {
    pub(crate) fn new(body: B, ranges: Vec<ByteRange>, content_type: String, boundary: String) -> Self {
        let total_size = body.byte_size();
        let content_length = ranges
            .iter()
            .enumerate()
            .map(|(i, range)| {
                let head = part_header(&boundary, i == 0, &content_type, range, total_size);
                head.len() as u64 + range.len()
            })
            .sum::<u64>()
            + closing_boundary(&boundary).len() as u64;

        MultipartStream {
            state: MultipartState::PartHeader,
            ranges,
            current_range_index: 0,
            total_size,
            content_type,
            boundary,
            content_length,
            body,
        }
    }

    /// Exact number of body bytes, part headers and boundaries included.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }
}

impl<B> std::fmt::Debug for MultipartStream<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartStream")
            .field("state", &self.state)
            .field("ranges", &self.ranges)
            .field("boundary", &self.boundary)
            .field("content_length", &self.content_length)
            .finish()
    }
}

#[derive(Debug)]
enum MultipartState {
    PartHeader,
    Seek { start: u64 },
    Seeking { remaining: u64 },
    Reading { buffer: BytesMut, remaining: u64 },
    ClosingBoundary,
    Finished,
}

impl<B: RangeBody + Send + 'static> IntoResponse for MultipartStream<B> {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl<B: RangeBody> Body for MultipartStream<B> {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.content_length)
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl<B: RangeBody> Stream for MultipartStream<B> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>
    ) -> Poll<Option<io::Result<Bytes>>> {
        let mut this = self.project();

        loop {
            match this.state {
                MultipartState::PartHeader => {
                    let index = *this.current_range_index;
                    let Some(range) = this.ranges.get(index) else {
                        *this.state = MultipartState::ClosingBoundary;
                        continue;
                    };

                    let head = part_header(this.boundary, index == 0, this.content_type, range, *this.total_size);
                    *this.state = MultipartState::Seek { start: range.start };
                    return Poll::Ready(Some(Ok(Bytes::from(head))));
                }

                MultipartState::Seek { start } => {
                    match this.body.as_mut().start_seek(*start) {
                        Err(e) => return Poll::Ready(Some(Err(e))),
                        Ok(()) => {
                            let remaining = this.ranges[*this.current_range_index].len();
                            *this.state = MultipartState::Seeking { remaining };
                        }
                    }
                }

                MultipartState::Seeking { remaining } => {
                    match this.body.as_mut().poll_complete(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(e))),
                        Poll::Ready(Ok(())) => {
                            let buffer = allocate_buffer();
                            *this.state = MultipartState::Reading { buffer, remaining: *remaining };
                        }
                    }
                }

                MultipartState::Reading { buffer, remaining } => {
                    if *remaining == 0 {
                        *this.current_range_index += 1;
                        *this.state = MultipartState::PartHeader;
                        continue;
                    }

                    return poll_read_chunk(this.body.as_mut(), cx, buffer, remaining).map(Some);
                }

                MultipartState::ClosingBoundary => {
                    *this.state = MultipartState::Finished;
                    return Poll::Ready(Some(Ok(Bytes::from(closing_boundary(this.boundary)))));
                }

                MultipartState::Finished => {
                    return Poll::Ready(None);
                }
            }
        }
    }
}

/// Reads at most one buffer worth of the `remaining` bytes.
///
/// Hitting end of file early is an error, the headers already promised
/// `remaining` more bytes.
fn poll_read_chunk<B: RangeBody>(
    body: Pin<&mut B>,
    cx: &mut Context<'_>,
    buffer: &mut BytesMut,
    remaining: &mut u64,
) -> Poll<io::Result<Bytes>> {
    let uninit = buffer.spare_capacity_mut();

    // the smaller of the buffer size and the number of bytes remaining
    let nbytes = std::cmp::min(
        uninit.len(),
        usize::try_from(*remaining).unwrap_or(usize::MAX),
    );

    let mut read_buf = ReadBuf::uninit(&mut uninit[0..nbytes]);

    match body.poll_read(cx, &mut read_buf) {
        Poll::Pending => Poll::Pending,
        Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
        Poll::Ready(Ok(())) => match read_buf.filled().len() {
            0 => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("resource ended with {} bytes left to send", remaining),
            ))),
            n => {
                // SAFETY: poll_read has filled the buffer with `n`
                // additional bytes. `buffer.len` should always be
                // 0 here, but include it for rigorous correctness
                unsafe { buffer.set_len(buffer.len() + n); }

                let chunk = mem::replace(buffer, allocate_buffer());

                // n <= remaining because of the cmp::min above
                *remaining -= n as u64;

                Poll::Ready(Ok(chunk.freeze()))
            }
        },
    }
}

fn part_header(boundary: &str, first: bool, content_type: &str, range: &ByteRange, total_size: u64) -> String {
    let separator = if first { "" } else { "\r\n" };
    format!(
        "{separator}--{boundary}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Range: bytes {}-{}/{total_size}\r\n\r\n",
        range.start, range.end,
    )
}

fn closing_boundary(boundary: &str) -> String {
    format!("\r\n--{boundary}--\r\n")
}

fn allocate_buffer() -> BytesMut {
    BytesMut::with_capacity(IO_BUFFER_SIZE)
}

/// Generate a boundary token for a multipart response, unique within the process.
pub(crate) fn generate_boundary() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("RANGE_BOUNDARY_{timestamp:x}_{sequence:x}")
}

/// Pull the boundary token out of a `multipart/byteranges` content type.
pub fn extract_boundary(content_type: &str) -> Option<&str> {
    let (essence, params) = content_type.split_once(';')?;
    if !essence.trim().eq_ignore_ascii_case("multipart/byteranges") {
        return None;
    }

    params
        .split(';')
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use bytes::Bytes;
    use futures::{pin_mut, Stream, StreamExt};
    use http_body::Body;

    use super::{extract_boundary, generate_boundary, MultipartStream, RangedStream};
    use crate::{ByteRange, KnownSize};

    const CONTENT: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

    async fn collect_stream(stream: impl Stream<Item = io::Result<Bytes>>) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await.transpose()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    fn body() -> KnownSize<Cursor<&'static [u8]>> {
        KnownSize::sized(Cursor::new(CONTENT), CONTENT.len() as u64)
    }

    #[tokio::test]
    async fn test_ranged_stream_window() {
        let stream = RangedStream::new(body(), 10, 26);
        assert_eq!(Some(26), Body::size_hint(&stream).exact());
        assert_eq!(b"ABCDEFGHIJKLMNOPQRSTUVWXYZ".to_vec(), collect_stream(stream).await.unwrap());
    }

    #[tokio::test]
    async fn test_ranged_stream_empty() {
        let stream = RangedStream::new(KnownSize::sized(Cursor::new(&b""[..]), 0), 0, 0);
        assert!(collect_stream(stream).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ranged_stream_large_window_is_chunked() {
        let data = (0..200_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
        let size = data.len() as u64;
        let stream = RangedStream::new(KnownSize::sized(Cursor::new(data.clone()), size), 1, size - 1);
        pin_mut!(stream);

        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= super::IO_BUFFER_SIZE);
            out.extend_from_slice(&chunk);
        }
        assert_eq!(&data[1..], &out[..]);
    }

    #[tokio::test]
    async fn test_ranged_stream_truncated_resource() {
        // cached size says 100, the file only has 62 bytes
        let stream = RangedStream::new(KnownSize::sized(Cursor::new(CONTENT), 100), 50, 50);
        let err = collect_stream(stream).await.unwrap_err();
        assert_eq!(io::ErrorKind::UnexpectedEof, err.kind());
    }

    #[tokio::test]
    async fn test_multipart_stream() {
        let ranges = vec![ByteRange::new(0, 9), ByteRange::new(36, 40)];
        let stream = MultipartStream::new(body(), ranges, "text/plain".to_string(), "XYZ".to_string());
        let expected_len = stream.content_length();

        let out = collect_stream(stream).await.unwrap();
        let expected = "--XYZ\r\n\
                        Content-Type: text/plain\r\n\
                        Content-Range: bytes 0-9/62\r\n\r\n\
                        0123456789\
                        \r\n--XYZ\r\n\
                        Content-Type: text/plain\r\n\
                        Content-Range: bytes 36-40/62\r\n\r\n\
                        abcde\
                        \r\n--XYZ--\r\n";
        assert_eq!(expected, String::from_utf8(out).unwrap());
        assert_eq!(expected.len() as u64, expected_len);
    }

    #[tokio::test]
    async fn test_multipart_overlapping_and_descending() {
        let ranges = vec![ByteRange::new(5, 7), ByteRange::new(0, 6), ByteRange::new(5, 7)];
        let stream = MultipartStream::new(body(), ranges, "text/plain".to_string(), "b".to_string());
        let out = String::from_utf8(collect_stream(stream).await.unwrap()).unwrap();

        let payloads = out
            .split("--b")
            .filter_map(|part| part.split_once("\r\n\r\n"))
            .map(|(_, payload)| payload.trim_end_matches("\r\n"))
            .collect::<Vec<_>>();
        assert_eq!(vec!["567", "0123456", "567"], payloads);
    }

    #[test]
    fn test_extract_boundary() {
        assert_eq!(Some("abc"), extract_boundary("multipart/byteranges; boundary=abc"));
        assert_eq!(Some("abc"), extract_boundary("multipart/byteranges;charset=x; boundary=\"abc\""));
        assert_eq!(None, extract_boundary("video/mp4"));
        assert_eq!(None, extract_boundary("multipart/form-data; boundary=abc"));
        assert_eq!(None, extract_boundary("multipart/byteranges; boundary="));
    }

    #[test]
    fn test_generate_boundary_is_unique() {
        let a = generate_boundary();
        let b = generate_boundary();
        assert_ne!(a, b);
        assert_eq!(Some(a.as_str()), extract_boundary(&format!("multipart/byteranges; boundary={a}")));
    }
}

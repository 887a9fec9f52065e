//! [`Stream`] adapter turning `text/event-stream` body chunks into
//! [`RawFrame`]s.
//!
//! Follows the HTML event-stream interpretation rules: LF, CR and CRLF line
//! endings, an optional leading BOM, `:` comments, one optional space after
//! the field colon, multi-line `data`, and an `id` that persists across
//! events. A trailing event without its terminating blank line is discarded.

use core::{
    fmt::{self, Display, Formatter},
    pin::Pin,
    str::Utf8Error,
    task::{Context, Poll, ready},
};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::Stream;

use super::RawFrame;

const BOM: &[u8] = b"\xEF\xBB\xBF";
const DEFAULT_EVENT: &str = "message";

/// Longest unterminated line buffered before the stream is rejected.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8 * 1024 * 1024;

/// Errors produced by [`FrameDecoder`].
#[derive(Debug, PartialEq)]
pub enum FrameError<E> {
    /// Something went wrong with the underlying stream.
    Transport(E),
    /// The stream contained invalid UTF-8.
    Utf8(Utf8Error),
    /// A line grew past the configured limit without a terminator.
    LineTooLong { limit: usize },
}

impl<E: Display> Display for FrameError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => e.fmt(f),
            Self::Utf8(e) => e.fmt(f),
            Self::LineTooLong { limit } => {
                write!(f, "event-stream line exceeds {limit} bytes")
            }
        }
    }
}

impl<E> core::error::Error for FrameError<E> where E: core::error::Error {}

#[derive(Debug, Default)]
struct PendingFrame {
    event: String,
    data: String,
    has_data: bool,
    id: String,
}

impl PendingFrame {
    fn apply(&mut self, line: &str) -> Option<RawFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = value.to_string(),
            "data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(value);
                self.has_data = true;
            }
            "id" if !value.contains('\0') => self.id = value.to_string(),
            // `retry` is owned by the session supervisor, not the server.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<RawFrame> {
        let event = core::mem::take(&mut self.event);
        if !self.has_data {
            return None;
        }
        self.has_data = false;

        Some(RawFrame {
            event: if event.is_empty() {
                DEFAULT_EVENT.to_string()
            } else {
                event
            },
            data: core::mem::take(&mut self.data),
            id: self.id.clone(),
        })
    }
}

/// Split the next complete line off `buffer`, consuming its terminator.
fn next_line(buffer: &mut BytesMut, eof: bool) -> Option<BytesMut> {
    let pos = memchr::memchr2(b'\n', b'\r', buffer)?;
    if buffer[pos] == b'\r' && pos + 1 == buffer.len() && !eof {
        // Could be the first half of a CRLF split across chunks.
        return None;
    }

    let line = buffer.split_to(pos);
    let terminator = if buffer.starts_with(b"\r\n") { 2 } else { 1 };
    buffer.advance(terminator);
    Some(line)
}

/// Strip a leading BOM. Returns false while there are too few bytes to tell.
fn strip_bom(buffer: &mut BytesMut, eof: bool) -> bool {
    if buffer.len() < BOM.len() && BOM.starts_with(buffer) && !eof {
        return false;
    }
    if buffer.starts_with(BOM) {
        buffer.advance(BOM.len());
    }
    true
}

pin_project_lite::pin_project! {
    /// Decodes a byte-chunk stream into [`RawFrame`]s.
    #[derive(Debug)]
    pub struct FrameDecoder<S> {
        #[pin]
        inner: S,
        buffer: BytesMut,
        pending: PendingFrame,
        bom_checked: bool,
        eof: bool,
        max_line_length: usize,
    }
}

impl<S> FrameDecoder<S> {
    /// Wrap a stream of body chunks.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            pending: PendingFrame::default(),
            bom_checked: false,
            eof: false,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    /// Reject lines longer than `limit` bytes.
    #[must_use]
    pub fn with_max_line_length(mut self, limit: usize) -> Self {
        self.max_line_length = limit;
        self
    }
}

impl<S, E> Stream for FrameDecoder<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    type Item = Result<RawFrame, FrameError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if !*this.bom_checked {
                *this.bom_checked = strip_bom(this.buffer, *this.eof);
            }
            if *this.bom_checked {
                while let Some(line) = next_line(this.buffer, *this.eof) {
                    let line = match core::str::from_utf8(&line) {
                        Ok(line) => line,
                        Err(e) => return Poll::Ready(Some(Err(FrameError::Utf8(e)))),
                    };
                    if let Some(frame) = this.pending.apply(line) {
                        return Poll::Ready(Some(Ok(frame)));
                    }
                }
            }
            if *this.eof {
                return Poll::Ready(None);
            }
            if this.buffer.len() > *this.max_line_length {
                // Terminal: nothing after an oversized line can be trusted.
                this.buffer.clear();
                *this.eof = true;
                return Poll::Ready(Some(Err(FrameError::LineTooLong {
                    limit: *this.max_line_length,
                })));
            }

            match ready!(this.inner.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Poll::Ready(Some(Err(FrameError::Transport(e)))),
                None => *this.eof = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};

    use super::*;

    async fn decode(chunks: &[&'static [u8]]) -> Vec<Result<RawFrame, FrameError<()>>> {
        let input = stream::iter(
            chunks
                .iter()
                .map(|chunk| Ok::<_, ()>(Bytes::from_static(chunk)))
                .collect::<Vec<_>>(),
        );
        FrameDecoder::new(input).collect().await
    }

    async fn frames(chunks: &[&'static [u8]]) -> Vec<RawFrame> {
        decode(chunks)
            .await
            .into_iter()
            .map(|r| r.expect("frame"))
            .collect()
    }

    #[tokio::test]
    async fn test_named_events() {
        let out = frames(&[
            b"event: put\ndata: {\"path\":\"/\",\"data\":1}\n\nevent: patch\ndata: {}\n\n",
        ])
        .await;
        assert_eq!(
            out,
            vec![
                RawFrame::new("put", "{\"path\":\"/\",\"data\":1}"),
                RawFrame::new("patch", "{}"),
            ]
        );
    }

    #[tokio::test]
    async fn test_frames_split_across_chunks() {
        let out = frames(&[b"event: pu", b"t\nda", b"ta: hel", b"lo\n", b"\n"]).await;
        assert_eq!(out, vec![RawFrame::new("put", "hello")]);
    }

    #[tokio::test]
    async fn test_crlf_split_between_chunks() {
        let out = frames(&[b"data: a\r", b"\n\r", b"\n"]).await;
        assert_eq!(out, vec![RawFrame::new("message", "a")]);
    }

    #[tokio::test]
    async fn test_bare_cr_line_endings() {
        let out = frames(&[b"event: patch\rdata: x\r\r"]).await;
        assert_eq!(out, vec![RawFrame::new("patch", "x")]);
    }

    #[tokio::test]
    async fn test_comments_and_multiline_data() {
        let out = frames(&[b": heartbeat\ndata: line one\ndata:line two\nretry: 10\n\n"]).await;
        assert_eq!(out, vec![RawFrame::new("message", "line one\nline two")]);
    }

    #[tokio::test]
    async fn test_leading_bom_is_stripped() {
        let out = frames(&[b"\xEF\xBB", b"\xBFevent: put\ndata: 1\n\n"]).await;
        assert_eq!(out, vec![RawFrame::new("put", "1")]);
    }

    #[tokio::test]
    async fn test_event_without_data_is_not_dispatched() {
        let out = frames(&[b"event: keep-alive\n\nevent: keep-alive\ndata: null\n\n"]).await;
        assert_eq!(out, vec![RawFrame::new("keep-alive", "null")]);
    }

    #[tokio::test]
    async fn test_id_persists_across_events() {
        let out = frames(&[b"id: 7\ndata: a\n\ndata: b\n\n"]).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, "7");
        assert_eq!(out[1].id, "7");
    }

    #[tokio::test]
    async fn test_unterminated_trailing_event_is_discarded() {
        let out = frames(&[b"data: complete\n\ndata: partial\n"]).await;
        assert_eq!(out, vec![RawFrame::new("message", "complete")]);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_reported() {
        let out = decode(&[b"data: \xFF\xFE\n\n"]).await;
        assert!(matches!(out.first(), Some(Err(FrameError::Utf8(_)))));
    }

    #[tokio::test]
    async fn test_oversized_line_ends_the_stream() {
        let input = stream::iter(vec![
            Ok::<_, ()>(Bytes::from_static(b"data: ok\n\n")),
            Ok(Bytes::from_static(b"data: 0123456789")),
            Ok(Bytes::from_static(b"0123456789")),
            Ok(Bytes::from_static(b"\n\n")),
        ]);
        let out: Vec<_> = FrameDecoder::new(input)
            .with_max_line_length(16)
            .collect()
            .await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0], Ok(RawFrame::new("message", "ok")));
        assert_eq!(out[1], Err(FrameError::LineTooLong { limit: 16 }));
    }

    #[tokio::test]
    async fn test_transport_error_is_forwarded() {
        let input = stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Err("reset"),
        ]);
        let out: Vec<_> = FrameDecoder::new(input).collect().await;
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert_eq!(out[1], Err(FrameError::Transport("reset")));
    }
}

//! Streaming transport abstraction.
//!
//! An [`EventSource`] turns a URL plus headers into a [`SourceStream`] of
//! [`SourceEvent`]s. The stream reports `Open` once the endpoint accepted the
//! request, then frames, and ends after an `Error` or `Closed`. Dropping the
//! stream closes the underlying connection.
//!
//! ```text
//! open(url, headers) ──► Open ─► Frame* ─► Error | Closed
//!                    └─► Error                (could not connect)
//! ```

pub mod decoder;
pub mod http;

use futures_util::stream::BoxStream;

use crate::error::StreamError;

pub use self::{
    decoder::{DEFAULT_MAX_LINE_LENGTH, FrameDecoder, FrameError},
    http::HttpEventSource,
};

/// One dispatched `text/event-stream` event, before payload decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    /// Event type label (`message` when the server sent none).
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
    /// Last event id seen on the stream.
    pub id: String,
}

impl RawFrame {
    /// Create a frame with an empty id.
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: String::new(),
        }
    }
}

/// Signals produced by an open connection.
#[derive(Debug)]
pub enum SourceEvent {
    /// The endpoint accepted the request and is streaming.
    Open,
    /// A complete frame arrived.
    Frame(RawFrame),
    /// The connection failed; no further items follow.
    Error(StreamError),
    /// The server ended the stream; no further items follow.
    Closed,
}

/// Boxed stream returned by [`EventSource::open`].
pub type SourceStream = BoxStream<'static, SourceEvent>;

/// A transport able to open long-lived event streams.
pub trait EventSource: Send + Sync + 'static {
    /// Start connecting to `url`. Connection progress is reported through
    /// the returned stream; this call itself does no I/O.
    fn open(&self, url: &str, headers: &::http::HeaderMap) -> SourceStream;
}

//! Production [`EventSource`] over HTTP.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, future, stream};
use tracing::debug;

use super::{EventSource, FrameDecoder, FrameError, SourceEvent, SourceStream};
use crate::error::{StreamError, StreamResult};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

impl From<FrameError<reqwest::Error>> for StreamError {
    fn from(e: FrameError<reqwest::Error>) -> Self {
        match e {
            FrameError::Transport(e) => Self::Http(e),
            FrameError::Utf8(e) => Self::decode(e.to_string()),
            e @ FrameError::LineTooLong { .. } => Self::decode(e.to_string()),
        }
    }
}

/// Opens event streams with a shared `reqwest` client.
#[derive(Clone, Debug)]
pub struct HttpEventSource {
    client: reqwest::Client,
}

impl HttpEventSource {
    /// Create a source with the default TCP connect timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> StreamResult<Self> {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a source with a custom TCP connect timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_connect_timeout(timeout: Duration) -> StreamResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| StreamError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Use an existing client (proxies, TLS roots, pooling).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Send the request and validate that the answer is an event stream.
async fn establish(
    client: reqwest::Client,
    url: String,
    headers: http::HeaderMap,
) -> StreamResult<FrameDecoder<impl Stream<Item = Result<Bytes, reqwest::Error>>>> {
    let resp = client.get(&url).headers(headers).send().await?;

    let status = resp.status();
    if !status.is_success() {
        return Err(StreamError::invalid_status(status));
    }

    if let Some(ct) = resp.headers().get(http::header::CONTENT_TYPE) {
        let ct_str = ct.to_str().unwrap_or("");
        if !ct_str.contains("text/event-stream") {
            return Err(StreamError::invalid_content_type(ct_str));
        }
    }

    debug!(url = %url, status = %status, "Event stream response accepted");
    Ok(FrameDecoder::new(resp.bytes_stream()))
}

impl EventSource for HttpEventSource {
    fn open(&self, url: &str, headers: &http::HeaderMap) -> SourceStream {
        let connecting = establish(self.client.clone(), url.to_owned(), headers.clone());

        stream::once(connecting)
            .flat_map(|result| match result {
                Ok(frames) => stream::once(future::ready(SourceEvent::Open))
                    .chain(frames.map(|item| match item {
                        Ok(frame) => SourceEvent::Frame(frame),
                        Err(e) => SourceEvent::Error(e.into()),
                    }))
                    .chain(stream::once(future::ready(SourceEvent::Closed)))
                    .boxed(),
                Err(e) => stream::once(future::ready(SourceEvent::Error(e))).boxed(),
            })
            .boxed()
    }
}

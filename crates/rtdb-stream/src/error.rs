//! Error handling for stream supervision.

use std::time::Duration;

use thiserror::Error;

/// The main result type used throughout the crate.
pub type StreamResult<T> = Result<T, StreamError>;

/// Error type for stream connections and the manager API.
#[derive(Error, Debug)]
pub enum StreamError {
    /// HTTP request errors from the underlying client
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The event endpoint answered with a non-2xx status
    #[error("Unexpected response status: {status}")]
    InvalidStatus { status: http::StatusCode },

    /// The event endpoint did not answer with `text/event-stream`
    #[error("Unexpected content type: {content_type}")]
    InvalidContentType { content_type: String },

    /// The byte stream could not be decoded into frames
    #[error("Malformed event stream: {message}")]
    Decode { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The first open did not happen in time
    #[error("Connection timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The connection ended or was torn down
    #[error("Connection closed: {}", reason.as_deref().unwrap_or("no reason given"))]
    ConnectionClosed { reason: Option<String> },

    /// Keep-alive monitor found no traffic for too long
    #[error("No events received for {idle:?}")]
    Inactive { idle: Duration },

    /// No session is registered under this id
    #[error("Stream not found: {stream_id}")]
    NotFound { stream_id: String },
}

impl StreamError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed { reason }
    }

    /// Create an inactivity error.
    pub fn inactive(idle: Duration) -> Self {
        Self::Inactive { idle }
    }

    /// Create a not-found error.
    pub fn not_found(stream_id: impl Into<String>) -> Self {
        Self::NotFound {
            stream_id: stream_id.into(),
        }
    }

    /// Create an invalid-status error.
    pub fn invalid_status(status: http::StatusCode) -> Self {
        Self::InvalidStatus { status }
    }

    /// Create an invalid-content-type error.
    pub fn invalid_content_type(content_type: impl Into<String>) -> Self {
        Self::InvalidContentType {
            content_type: content_type.into(),
        }
    }

    /// Whether the error came from the transport rather than the caller.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::InvalidStatus { .. }
                | Self::InvalidContentType { .. }
                | Self::Decode { .. }
                | Self::ConnectionClosed { .. }
                | Self::Inactive { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StreamError::config("Invalid URL");
        assert!(matches!(err, StreamError::Config { .. }));

        let err = StreamError::timeout(Duration::from_secs(5));
        assert!(matches!(err, StreamError::Timeout { .. }));

        let err = StreamError::not_found("payment");
        assert_eq!(err.to_string(), "Stream not found: payment");
    }

    #[test]
    fn test_connection_closed_display() {
        let err = StreamError::connection_closed(None);
        assert_eq!(err.to_string(), "Connection closed: no reason given");

        let err = StreamError::connection_closed(Some("server hung up".to_string()));
        assert_eq!(err.to_string(), "Connection closed: server hung up");
    }

    #[test]
    fn test_transport_classification() {
        assert!(StreamError::inactive(Duration::from_secs(300)).is_transport());
        assert!(StreamError::invalid_status(http::StatusCode::FORBIDDEN).is_transport());
        assert!(!StreamError::config("bad").is_transport());
        assert!(!StreamError::not_found("x").is_transport());
    }
}

//! Event, status and frame classification types.

use std::{fmt, time::SystemTime};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::StreamResult;

/// Classification of an incoming frame by its event-type label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameKind {
    /// Carries a JSON body with `path` and `data`.
    Data,
    /// Server heartbeat; only proves liveness.
    KeepAlive,
    /// Server-side revocation or cancellation; the server closes afterwards.
    Control,
    /// Unrecognised label.
    Unknown,
}

/// Event-type labels and how each is handled. New labels go here.
const FRAME_KINDS: &[(&str, FrameKind)] = &[
    ("put", FrameKind::Data),
    ("patch", FrameKind::Data),
    ("message", FrameKind::Data),
    ("keep-alive", FrameKind::KeepAlive),
    ("cancel", FrameKind::Control),
    ("auth_revoked", FrameKind::Control),
];

impl FrameKind {
    /// Look up the kind for an event-type label.
    pub fn classify(event_type: &str) -> Self {
        FRAME_KINDS
            .iter()
            .find(|(label, _)| *label == event_type)
            .map_or(Self::Unknown, |(_, kind)| *kind)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "Data"),
            Self::KeepAlive => write!(f, "KeepAlive"),
            Self::Control => write!(f, "Control"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A decoded state change delivered to
/// [`StreamListener::on_data`](crate::listener::StreamListener::on_data).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StreamEvent {
    /// Sub-resource that changed (`/` for the whole node).
    pub path: String,
    /// Changed value; never `null`.
    pub data: Value,
    /// Registration that produced the event.
    pub stream_id: String,
}

impl StreamEvent {
    /// Deserialize the payload into a caller-defined type.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `data` does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> StreamResult<T> {
        Ok(T::deserialize(&self.data)?)
    }
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    path: Value,
    #[serde(default)]
    data: Value,
}

/// Render `path` whatever its JSON shape; absent or `null` becomes `""`.
fn path_string(path: Value) -> String {
    match path {
        Value::Null => String::new(),
        Value::String(path) => path,
        other => other.to_string(),
    }
}

/// Decode a data frame body.
///
/// Returns `Ok(None)` when the body carries no `data` (absent or `null`).
pub(crate) fn decode_event(stream_id: &str, body: &str) -> StreamResult<Option<StreamEvent>> {
    let payload: Payload = serde_json::from_str(body)?;
    if payload.data.is_null() {
        return Ok(None);
    }
    Ok(Some(StreamEvent {
        path: path_string(payload.path),
        data: payload.data,
        stream_id: stream_id.to_string(),
    }))
}

/// Point-in-time view of one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    /// Whether the stream is currently open.
    pub is_connected: bool,
    /// Reconnect attempts since the last successful open.
    pub retry_count: u32,
    /// Wall-clock time of the last frame or open.
    pub last_event_time: SystemTime,
}

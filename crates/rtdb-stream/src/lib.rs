//! # rtdb-stream
//!
//! Supervised event streams for realtime-database push channels.
//!
//! A [`StreamManager`] keeps any number of long-lived `text/event-stream`
//! connections open, one per stream id, and delivers decoded state changes
//! to caller callbacks. Each session is watched independently:
//!
//! - **Reconnection**: errors and server closes are retried with exponential
//!   backoff (`min(base * 2^n, 30s)`) up to a bounded number of attempts.
//! - **Keep-alive**: a periodic check reconnects streams that went silent
//!   without the transport noticing.
//! - **Clean teardown**: disconnecting at any point leaves no timers or
//!   connections behind.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtdb_stream::{ListenerOptions, ManagerConfig, StreamManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = StreamManager::with_http(ManagerConfig::new(
//!     "https://example-default-rtdb.firebaseio.com",
//! ))?;
//!
//! let options = ListenerOptions::new(|event| {
//!     println!("{} changed at {}: {}", event.stream_id, event.path, event.data);
//! })
//! .on_max_retries_reached(|id| eprintln!("giving up on {id}"));
//!
//! manager.listen_to_payment_events("txn_123", options).await?;
//!
//! // ... later, on teardown
//! manager.disconnect_all().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Index
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`manager`] | [`StreamManager`] registry and operations |
//! | [`listener`] | [`StreamListener`] trait and [`ListenerOptions`] |
//! | [`config`] | [`ManagerConfig`], [`StreamTuning`], [`StreamConfig`] |
//! | [`channel`] | Known stream categories and their URLs |
//! | [`source`] | Transport trait and the HTTP implementation |
//! | [`backoff`] | Reconnect delay computation |

pub mod backoff;
pub mod channel;
pub mod config;
pub mod error;
pub mod listener;
pub mod manager;
mod session;
pub mod source;
pub mod types;

pub use channel::Channel;
pub use config::{DEFAULT_BASE_URL, ManagerConfig, StreamConfig, StreamTuning};
pub use error::{StreamError, StreamResult};
pub use listener::{ListenerOptions, StreamListener};
pub use manager::StreamManager;
pub use source::{EventSource, HttpEventSource, RawFrame, SourceEvent, SourceStream};
pub use types::{FrameKind, StreamEvent, StreamStatus};

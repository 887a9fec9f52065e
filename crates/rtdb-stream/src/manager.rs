//! The stream connection manager.
//!
//! [`StreamManager`] owns a registry of supervised sessions, at most one per
//! stream id. Registering an id that is already live tears the old session
//! down first. Only the first open of a registration is reported through the
//! returned future; everything after that flows through the
//! [`StreamListener`] callbacks.

use std::{
    collections::HashMap,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures_util::future::join_all;
use tokio::{sync::oneshot, time::timeout};
use tracing::{error, info, warn};

use crate::{
    channel::Channel,
    config::{ManagerConfig, StreamConfig, StreamTuning},
    error::{StreamError, StreamResult},
    listener::{ListenerOptions, StreamListener},
    session::{self, Registry, SessionCommand, SessionEntry},
    source::{EventSource, HttpEventSource},
    types::StreamStatus,
};

static SHARED: OnceLock<StreamManager> = OnceLock::new();

struct ManagerInner {
    config: ManagerConfig,
    source: Arc<dyn EventSource>,
    sessions: Arc<Registry>,
    next_generation: AtomicU64,
}

/// Supervises concurrent event streams keyed by stream id.
///
/// Cheap to clone; all clones share one registry. When the last clone is
/// dropped every session is closed.
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<ManagerInner>,
}

impl StreamManager {
    /// Create a manager over an arbitrary transport.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails.
    pub fn new(config: ManagerConfig, source: impl EventSource) -> StreamResult<Self> {
        config.validate().map_err(StreamError::config)?;
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                source: Arc::new(source),
                sessions: Arc::new(Registry::new()),
                next_generation: AtomicU64::new(0),
            }),
        })
    }

    /// Create a manager over [`HttpEventSource`].
    ///
    /// # Errors
    ///
    /// Returns an error if configuration validation fails or the HTTP client
    /// cannot be built.
    pub fn with_http(config: ManagerConfig) -> StreamResult<Self> {
        Self::new(config, HttpEventSource::new()?)
    }

    /// Process-wide manager over HTTP with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built on first use.
    pub fn shared() -> StreamResult<&'static StreamManager> {
        if let Some(manager) = SHARED.get() {
            return Ok(manager);
        }
        let manager = Self::with_http(ManagerConfig::default())?;
        Ok(SHARED.get_or_init(|| manager))
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Listen on `url` under `stream_id`.
    ///
    /// Resolves once the stream opens. On timeout or a failed first attempt
    /// the error is returned, but the session stays registered and keeps
    /// reconnecting in the background.
    ///
    /// # Errors
    ///
    /// Returns a configuration error, [`StreamError::Timeout`], or the error
    /// that ended the first attempt.
    pub async fn listen(
        &self,
        stream_id: impl Into<String>,
        url: impl Into<String>,
        options: ListenerOptions,
    ) -> StreamResult<()> {
        let tuning = options.resolve(&self.inner.config.defaults);
        let config = StreamConfig::new(stream_id, url).tuning(tuning);
        self.listen_with(config, options).await
    }

    /// Listen with a fully resolved configuration and any listener type.
    ///
    /// # Errors
    ///
    /// See [`listen`](Self::listen).
    pub async fn listen_with(
        &self,
        config: StreamConfig,
        listener: impl StreamListener,
    ) -> StreamResult<()> {
        config.validate().map_err(StreamError::config)?;
        let stream_id = config.stream_id.clone();
        let limit = config.tuning.connection_timeout;

        self.disconnect(&stream_id).await;

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let spawned = session::spawn(
            config,
            generation,
            Arc::new(listener),
            Arc::clone(&self.inner.source),
            Arc::downgrade(&self.inner.sessions),
        );
        self.register(stream_id.clone(), spawned.entry).await;
        let _ = spawned.start.send(());

        let result = await_open(spawned.opened, limit, &stream_id).await;
        if let Err(err) = &result {
            error!(stream_id = %stream_id, error = %err, "Failed to connect stream");
        }
        result
    }

    /// Insert `entry`, evicting whatever raced in under the same id.
    async fn register(&self, stream_id: String, mut entry: SessionEntry) {
        loop {
            match self.inner.sessions.insert_sync(stream_id.clone(), entry) {
                Ok(()) => return,
                Err((_, rejected)) => {
                    entry = rejected;
                    if let Some((_, previous)) = self.inner.sessions.remove_sync(&stream_id) {
                        previous.shutdown().await;
                    }
                }
            }
        }
    }

    /// Listen on a well-known channel for `key`.
    ///
    /// # Errors
    ///
    /// See [`listen`](Self::listen).
    pub async fn listen_channel(
        &self,
        channel: Channel,
        key: &str,
        options: ListenerOptions,
    ) -> StreamResult<()> {
        let url = channel.url(self.inner.config.base_url(), key);
        info!(channel = %channel, key, "Listening to channel");
        self.listen(channel.stream_id(), url, options).await
    }

    /// Listen for payment status updates of a transaction.
    ///
    /// # Errors
    ///
    /// See [`listen`](Self::listen).
    pub async fn listen_to_payment_events(
        &self,
        transaction_id: &str,
        options: ListenerOptions,
    ) -> StreamResult<()> {
        self.listen_channel(Channel::PaymentUpdate, transaction_id, options)
            .await
    }

    /// Listen for messages about a transaction.
    ///
    /// # Errors
    ///
    /// See [`listen`](Self::listen).
    pub async fn listen_to_transaction_events(
        &self,
        transaction_id: &str,
        options: ListenerOptions,
    ) -> StreamResult<()> {
        self.listen_channel(Channel::TransactionMessages, transaction_id, options)
            .await
    }

    /// Listen for authentication success of a login session.
    ///
    /// # Errors
    ///
    /// See [`listen`](Self::listen).
    pub async fn listen_to_authn_events(
        &self,
        session_id: &str,
        options: ListenerOptions,
    ) -> StreamResult<()> {
        self.listen_channel(Channel::LoginSuccess, session_id, options)
            .await
    }

    /// Listen for the close-tab signal of a transaction.
    ///
    /// # Errors
    ///
    /// See [`listen`](Self::listen).
    pub async fn listen_to_close_tab_events(
        &self,
        transaction_id: &str,
        options: ListenerOptions,
    ) -> StreamResult<()> {
        self.listen_channel(Channel::CloseTab, transaction_id, options)
            .await
    }

    /// Listen on an arbitrary endpoint and return its stream id.
    ///
    /// # Errors
    ///
    /// See [`listen`](Self::listen).
    pub async fn connect_to_custom_stream(
        &self,
        stream_id: impl Into<String>,
        url: impl Into<String>,
        options: ListenerOptions,
    ) -> StreamResult<String> {
        let stream_id = stream_id.into();
        self.listen(stream_id.clone(), url, options).await?;
        Ok(stream_id)
    }

    /// Tear down one session. Unknown ids are ignored.
    ///
    /// When this returns the session's connection and timers are gone and no
    /// further callbacks will fire for it.
    pub async fn disconnect(&self, stream_id: &str) {
        if let Some((_, entry)) = self.inner.sessions.remove_sync(stream_id) {
            info!(stream_id, "Disconnecting stream");
            entry.shutdown().await;
        }
    }

    /// Tear down every session concurrently.
    pub async fn disconnect_all(&self) {
        let ids = self.active_stream_ids();
        info!(count = ids.len(), "Disconnecting all streams");
        join_all(ids.iter().map(|id| self.disconnect(id))).await;
    }

    /// Drop the current connection of a session and open it again with a
    /// fresh retry budget, skipping backoff.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::NotFound`] for an unknown id, otherwise the
    /// same errors as [`listen`](Self::listen).
    pub async fn reconnect_stream(&self, stream_id: &str) -> StreamResult<()> {
        let (commands, limit) = self
            .inner
            .sessions
            .update_sync(stream_id, |_, entry| {
                (
                    entry.commands(),
                    entry.config.read().tuning.connection_timeout,
                )
            })
            .ok_or_else(|| StreamError::not_found(stream_id))?;

        let (reply, opened) = oneshot::channel();
        commands
            .send(SessionCommand::Reconnect { reply })
            .await
            .map_err(|_| StreamError::not_found(stream_id))?;

        await_open(opened, limit, stream_id).await
    }

    /// Change the tuning of a live session. Takes effect from the next
    /// connection attempt or backoff computation. Lowering `max_retries`
    /// below the current retry count clamps the count to the new budget.
    ///
    /// Returns `false` if the id is unknown or the result would be invalid,
    /// in which case nothing changes.
    pub fn update_stream_config(
        &self,
        stream_id: &str,
        update: impl FnOnce(&mut StreamTuning),
    ) -> bool {
        self.inner
            .sessions
            .update_sync(stream_id, |_, entry| {
                let mut config = entry.config.write();
                let mut tuning = config.tuning.clone();
                update(&mut tuning);
                match tuning.validate() {
                    Ok(()) => {
                        entry.state.clamp_retry_count(tuning.max_retries);
                        config.tuning = tuning;
                        true
                    }
                    Err(reason) => {
                        warn!(stream_id, reason = %reason, "Rejected stream config update");
                        false
                    }
                }
            })
            .unwrap_or(false)
    }

    /// Whether the session is currently open.
    pub fn is_connected(&self, stream_id: &str) -> bool {
        self.inner
            .sessions
            .update_sync(stream_id, |_, entry| entry.state.is_connected())
            .unwrap_or(false)
    }

    /// Reconnect attempts since the session last opened (0 if unknown).
    pub fn retry_count(&self, stream_id: &str) -> u32 {
        self.inner
            .sessions
            .update_sync(stream_id, |_, entry| entry.state.retry_count())
            .unwrap_or(0)
    }

    /// Ids of all registered sessions.
    pub fn active_stream_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.inner.sessions.retain_sync(|id, _| {
            ids.push(id.clone());
            true
        });
        ids
    }

    /// Number of registered sessions.
    pub fn active_stream_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Status of every registered session.
    pub fn status_snapshot(&self) -> HashMap<String, StreamStatus> {
        let mut snapshot = HashMap::new();
        self.inner.sessions.retain_sync(|id, entry| {
            snapshot.insert(id.clone(), entry.state.status());
            true
        });
        snapshot
    }
}

async fn await_open(
    opened: oneshot::Receiver<StreamResult<()>>,
    limit: Duration,
    stream_id: &str,
) -> StreamResult<()> {
    match timeout(limit, opened).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(StreamError::connection_closed(Some(format!(
            "stream {stream_id} was torn down before opening"
        )))),
        Err(_) => {
            warn!(
                stream_id,
                timeout_ms = limit.as_millis() as u64,
                "Stream did not open in time, retrying in background"
            );
            Err(StreamError::timeout(limit))
        }
    }
}

//! Caller-facing callbacks.
//!
//! Implement [`StreamListener`] directly, or build a [`ListenerOptions`]
//! bundle out of closures. All callbacks run on the session's supervisor
//! task and must not block.

use std::{fmt, sync::Arc, time::Duration};

use crate::{config::StreamTuning, error::StreamError, types::StreamEvent};

/// Receives lifecycle notifications and decoded events for one session.
pub trait StreamListener: Send + Sync + 'static {
    /// Called for every data frame carrying a non-null `data` payload.
    fn on_data(&self, event: StreamEvent);

    /// Called when a connection attempt fails or a live stream breaks.
    fn on_error(&self, _error: &StreamError) {}

    /// Called every time the stream opens, including after reconnects.
    fn on_connected(&self, _stream_id: &str) {}

    /// Called when a connection is lost or the session is disconnected.
    fn on_disconnected(&self, _stream_id: &str) {}

    /// Called once when the session gives up reconnecting.
    fn on_max_retries_reached(&self, _stream_id: &str) {}
}

type DataCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;
type ErrorCallback = Arc<dyn Fn(&StreamError) + Send + Sync>;
type LifecycleCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Closure-based listener plus optional per-stream tuning overrides.
#[derive(Clone)]
pub struct ListenerOptions {
    on_data: DataCallback,
    on_error: Option<ErrorCallback>,
    on_connected: Option<LifecycleCallback>,
    on_disconnected: Option<LifecycleCallback>,
    on_max_retries_reached: Option<LifecycleCallback>,
    max_retries: Option<u32>,
    retry_base_delay: Option<Duration>,
    keep_alive_check_interval: Option<Duration>,
    max_inactivity: Option<Duration>,
    connection_timeout: Option<Duration>,
    headers: Option<http::HeaderMap>,
}

impl ListenerOptions {
    /// Create options with the mandatory data callback.
    #[must_use]
    pub fn new(on_data: impl Fn(StreamEvent) + Send + Sync + 'static) -> Self {
        Self {
            on_data: Arc::new(on_data),
            on_error: None,
            on_connected: None,
            on_disconnected: None,
            on_max_retries_reached: None,
            max_retries: None,
            retry_base_delay: None,
            keep_alive_check_interval: None,
            max_inactivity: None,
            connection_timeout: None,
            headers: None,
        }
    }

    /// Set the error callback.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&StreamError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Set the connected callback.
    #[must_use]
    pub fn on_connected(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_connected = Some(Arc::new(f));
        self
    }

    /// Set the disconnected callback.
    #[must_use]
    pub fn on_disconnected(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_disconnected = Some(Arc::new(f));
        self
    }

    /// Set the retry-exhaustion callback.
    #[must_use]
    pub fn on_max_retries_reached(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_max_retries_reached = Some(Arc::new(f));
        self
    }

    /// Override the maximum number of reconnect attempts.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Override the base reconnect delay.
    #[must_use]
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    /// Override the keep-alive check period.
    #[must_use]
    pub fn keep_alive_check_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_check_interval = Some(interval);
        self
    }

    /// Override the inactivity threshold.
    #[must_use]
    pub fn max_inactivity(mut self, period: Duration) -> Self {
        self.max_inactivity = Some(period);
        self
    }

    /// Override the first-open timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Override the additional HTTP headers.
    #[must_use]
    pub fn headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Apply the overrides on top of `defaults`.
    pub(crate) fn resolve(&self, defaults: &StreamTuning) -> StreamTuning {
        let mut tuning = defaults.clone();
        if let Some(retries) = self.max_retries {
            tuning.max_retries = retries;
        }
        if let Some(delay) = self.retry_base_delay {
            tuning.retry_base_delay = delay;
        }
        if let Some(interval) = self.keep_alive_check_interval {
            tuning.keep_alive_check_interval = interval;
        }
        if let Some(period) = self.max_inactivity {
            tuning.max_inactivity = period;
        }
        if let Some(timeout) = self.connection_timeout {
            tuning.connection_timeout = timeout;
        }
        if let Some(headers) = &self.headers {
            tuning.headers = headers.clone();
        }
        tuning
    }
}

impl fmt::Debug for ListenerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerOptions")
            .field("on_error", &self.on_error.is_some())
            .field("on_connected", &self.on_connected.is_some())
            .field("on_disconnected", &self.on_disconnected.is_some())
            .field("on_max_retries_reached", &self.on_max_retries_reached.is_some())
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("keep_alive_check_interval", &self.keep_alive_check_interval)
            .field("max_inactivity", &self.max_inactivity)
            .field("connection_timeout", &self.connection_timeout)
            .finish_non_exhaustive()
    }
}

impl StreamListener for ListenerOptions {
    fn on_data(&self, event: StreamEvent) {
        (self.on_data)(event);
    }

    fn on_error(&self, error: &StreamError) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }

    fn on_connected(&self, stream_id: &str) {
        if let Some(f) = &self.on_connected {
            f(stream_id);
        }
    }

    fn on_disconnected(&self, stream_id: &str) {
        if let Some(f) = &self.on_disconnected {
            f(stream_id);
        }
    }

    fn on_max_retries_reached(&self, stream_id: &str) {
        if let Some(f) = &self.on_max_retries_reached {
            f(stream_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_resolve_keeps_defaults_without_overrides() {
        let defaults = StreamTuning::default().max_retries(7);
        let tuning = ListenerOptions::new(|_| {}).resolve(&defaults);
        assert_eq!(tuning.max_retries, 7);
        assert_eq!(tuning.retry_base_delay, defaults.retry_base_delay);
    }

    #[test]
    fn test_resolve_applies_overrides() {
        let options = ListenerOptions::new(|_| {})
            .max_retries(1)
            .retry_base_delay(Duration::from_millis(50))
            .keep_alive_check_interval(Duration::from_secs(2))
            .max_inactivity(Duration::from_secs(4))
            .connection_timeout(Duration::from_secs(6));
        let tuning = options.resolve(&StreamTuning::default());

        assert_eq!(tuning.max_retries, 1);
        assert_eq!(tuning.retry_base_delay, Duration::from_millis(50));
        assert_eq!(tuning.keep_alive_check_interval, Duration::from_secs(2));
        assert_eq!(tuning.max_inactivity, Duration::from_secs(4));
        assert_eq!(tuning.connection_timeout, Duration::from_secs(6));
        // Not overridable through options.
        assert_eq!(tuning.max_retry_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_optional_callbacks_are_no_ops_when_unset() {
        let options = ListenerOptions::new(|_| {});
        StreamListener::on_error(&options, &StreamError::connection_closed(None));
        StreamListener::on_connected(&options, "payment");
        StreamListener::on_disconnected(&options, "payment");
        StreamListener::on_max_retries_reached(&options, "payment");
    }

    #[test]
    fn test_callbacks_are_invoked() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h1 = Arc::clone(&hits);
        let h2 = Arc::clone(&hits);
        let options = ListenerOptions::new(|_| {})
            .on_connected(move |id| {
                assert_eq!(id, "payment");
                h1.fetch_add(1, Ordering::SeqCst);
            })
            .on_max_retries_reached(move |_| {
                h2.fetch_add(10, Ordering::SeqCst);
            });

        StreamListener::on_connected(&options, "payment");
        StreamListener::on_max_retries_reached(&options, "payment");
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }
}

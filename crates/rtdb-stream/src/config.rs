//! Manager and per-stream configuration.

use std::time::Duration;

use crate::backoff::BackoffConfig;

/// Realtime database used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str =
    "https://mona-money-default-rtdb.europe-west1.firebasedatabase.app";

/// Tunable supervision parameters of a single stream.
///
/// Every registration starts from the manager's defaults and may override
/// individual fields through
/// [`ListenerOptions`](crate::listener::ListenerOptions).
#[derive(Clone, Debug)]
pub struct StreamTuning {
    /// Reconnect attempts allowed before the session is abandoned.
    pub max_retries: u32,
    /// Delay before the first reconnect attempt.
    pub retry_base_delay: Duration,
    /// Upper bound for any reconnect delay.
    pub max_retry_delay: Duration,
    /// Backoff growth factor.
    pub backoff_factor: f64,
    /// Random jitter factor (0.0–1.0) for reconnect delays.
    pub jitter: f64,
    /// Period of the keep-alive check.
    pub keep_alive_check_interval: Duration,
    /// Silence after which a connected stream is considered stalled.
    pub max_inactivity: Duration,
    /// Time allowed for the first open to complete.
    pub connection_timeout: Duration,
    /// Additional HTTP headers sent with every connection attempt.
    pub headers: http::HeaderMap,
}

impl Default for StreamTuning {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_base_delay: Duration::from_millis(2000),
            max_retry_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.0,
            keep_alive_check_interval: Duration::from_secs(60),
            max_inactivity: Duration::from_secs(5 * 60),
            connection_timeout: Duration::from_secs(60),
            headers: http::HeaderMap::new(),
        }
    }
}

impl StreamTuning {
    /// Set the maximum number of reconnect attempts.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base reconnect delay.
    #[must_use]
    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Set the reconnect delay cap.
    #[must_use]
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    /// Set the backoff growth factor.
    #[must_use]
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the reconnect jitter factor.
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the keep-alive check period.
    #[must_use]
    pub fn keep_alive_check_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_check_interval = interval;
        self
    }

    /// Set the inactivity threshold.
    #[must_use]
    pub fn max_inactivity(mut self, period: Duration) -> Self {
        self.max_inactivity = period;
        self
    }

    /// Set the first-open timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set additional HTTP headers.
    #[must_use]
    pub fn headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub(crate) fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay: self.retry_base_delay,
            max_delay: self.max_retry_delay,
            factor: self.backoff_factor,
            jitter: self.jitter,
        }
    }

    /// Validate the tuning values.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        self.backoff().validate()?;
        if self.keep_alive_check_interval.is_zero() {
            return Err("Keep-alive check interval must be > 0".to_string());
        }
        if self.max_inactivity.is_zero() {
            return Err("Max inactivity must be > 0".to_string());
        }
        if self.connection_timeout.is_zero() {
            return Err("Connection timeout must be > 0".to_string());
        }
        Ok(())
    }
}

/// Fully resolved configuration of one stream registration.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Registry key of the session.
    pub stream_id: String,
    /// Endpoint to open.
    pub url: String,
    /// Supervision parameters.
    pub tuning: StreamTuning,
}

impl StreamConfig {
    /// Create a stream configuration with default tuning.
    #[must_use]
    pub fn new(stream_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            url: url.into(),
            tuning: StreamTuning::default(),
        }
    }

    /// Replace the tuning.
    #[must_use]
    pub fn tuning(mut self, tuning: StreamTuning) -> Self {
        self.tuning = tuning;
        self
    }

    /// Headers for a connection attempt: configured headers plus the
    /// event-stream negotiation headers.
    pub fn request_headers(&self) -> http::HeaderMap {
        let mut headers = self.tuning.headers.clone();
        headers.insert(
            http::header::ACCEPT,
            http::HeaderValue::from_static("text/event-stream"),
        );
        headers.insert(
            http::header::CACHE_CONTROL,
            http::HeaderValue::from_static("no-cache"),
        );
        headers
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.stream_id.is_empty() {
            return Err("Stream id cannot be empty".to_string());
        }
        if self.url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }
        self.tuning.validate()
    }
}

/// Configuration of a [`StreamManager`](crate::manager::StreamManager).
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Base URL of the realtime database; fixed for the manager's lifetime.
    pub base_url: String,
    /// Tuning applied to every registration unless overridden.
    pub defaults: StreamTuning,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            defaults: StreamTuning::default(),
        }
    }
}

impl ManagerConfig {
    /// Create a manager configuration for the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the default tuning for all registrations.
    #[must_use]
    pub fn defaults(mut self, defaults: StreamTuning) -> Self {
        self.defaults = defaults;
        self
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        let parsed =
            url::Url::parse(&self.base_url).map_err(|e| format!("Invalid base URL: {e}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(format!("Unsupported base URL scheme: {}", parsed.scheme()));
        }
        self.defaults.validate()
    }
}

//! Well-known stream categories published by the realtime database.

use std::fmt;

/// A category of pushed state changes.
///
/// Each category has a fixed registry id (one live session per category)
/// and a URL shape keyed by a transaction or session identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Channel {
    /// Payment status updates, keyed by transaction id.
    PaymentUpdate,
    /// Transaction messages, keyed by transaction id.
    TransactionMessages,
    /// Authentication success, keyed by session id.
    LoginSuccess,
    /// Signal to close an in-app browser tab, keyed by transaction id.
    CloseTab,
}

impl Channel {
    /// Registry id used for sessions on this channel.
    pub fn stream_id(self) -> &'static str {
        match self {
            Self::PaymentUpdate => "payment",
            Self::TransactionMessages => "transaction-messages",
            Self::LoginSuccess => "login_success",
            Self::CloseTab => "close_tab",
        }
    }

    /// Endpoint for `key` under `base_url`.
    pub fn url(self, base_url: &str, key: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            Self::PaymentUpdate => format!("{base}/public/paymentUpdate/{key}.json"),
            Self::TransactionMessages => {
                format!("{base}/public/transaction-messages/{key}.json")
            }
            Self::LoginSuccess => format!("{base}/public/login_success/authn_{key}.json"),
            Self::CloseTab => format!("{base}/public/close_tab/custom_tab_{key}.json"),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stream_id())
    }
}

//! Dial retry policy for client connections.
//!
//! Unlike the exponential schedules common elsewhere, every failed attempt waits the same
//! `connect_timeout` before the next dial. Two failures are special-cased:
//!
//! - a TLS-handshake close while dialing `ws://` rewrites the URL to `wss://` and dials again
//!   immediately without consuming an attempt;
//! - a transport timeout consumes an attempt but adds no delay, since the handshake timeout
//!   already elapsed.

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use super::error::WsError;

pub const INSECURE_SCHEME: &str = "ws://";
pub const SECURE_SCHEME: &str = "wss://";

/// What the dial supervisor does after a failed attempt.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Replace the connection URL with this one and dial again right away.
    UpgradeScheme(String),
    /// Count the attempt and dial again after `delay`.
    Retry {
        /// Time to wait before the next dial
        delay: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    connect_timeout: Duration,
    max_retries: u32,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(connect_timeout: Duration, max_retries: u32) -> Self {
        Self {
            connect_timeout,
            max_retries,
        }
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether `attempts` failed dials used up the budget.
    #[must_use]
    pub const fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_retries
    }

    /// Decide how to continue after `error` was returned while dialing `url`.
    #[must_use]
    pub fn classify(&self, url: &str, error: &WsError) -> RetryAction {
        if error.close_code() == Some(CloseCode::Tls) {
            if let Some(rest) = url.strip_prefix(INSECURE_SCHEME) {
                return RetryAction::UpgradeScheme(format!("{SECURE_SCHEME}{rest}"));
            }
        } else if error.is_timeout() {
            return RetryAction::Retry {
                delay: Duration::ZERO,
            };
        }

        RetryAction::Retry {
            delay: self.connect_timeout,
        }
    }
}

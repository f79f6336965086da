#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;
use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};

use super::retry::RetryPolicy;

const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(3);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_QUEUE_SIZE: usize = 1024;

/// Static parameters for a named connection.
///
/// Loading these from the application's configuration text is left to the caller; the struct
/// deserializes from any serde format with the timeout expressed in milliseconds:
///
/// ```
/// # use wsconn::ws::config::Config;
/// # use std::time::Duration;
/// let config = Config::builder()
///     .connect_timeout(Duration::from_millis(500))
///     .max_retries(5)
///     .build();
/// assert_eq!(config.queue_size, 1024);
/// ```
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Builder, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Handshake timeout for each dial, and the fixed delay between failed attempts
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    #[serde(rename = "connect_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub connect_timeout: Duration,
    /// Number of failed dial attempts after which a client connection gives up for good
    #[builder(default = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,
    /// Capacity of both the send and the receive queue
    #[builder(default = DEFAULT_QUEUE_SIZE)]
    pub queue_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT_DURATION,
            max_retries: DEFAULT_MAX_RETRIES,
            queue_size: DEFAULT_QUEUE_SIZE,
        }
    }
}

impl From<Config> for RetryPolicy {
    fn from(config: Config) -> Self {
        RetryPolicy::new(config.connect_timeout, config.max_retries)
    }
}

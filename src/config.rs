//! Connection configuration.
//!
//! [`ConnectionConfig`] carries the plain-data settings of a connection and can
//! be deserialized from any serde format. Durations are given in milliseconds.
//!
//! ```
//! use signalr_jabbr::config::ConnectionConfig;
//!
//! let config = ConnectionConfig::builder("http://localhost:16418/signalr")
//!     .logging(true)
//!     .query_string("token=abc")
//!     .build();
//! assert!(config.logging);
//! ```

use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Delay the owning application should wait before reconnecting.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

/// Number of missed keep-alive intervals before the connection is considered lost.
pub const DEFAULT_KEEP_ALIVE_TIMEOUT_COUNT: f64 = 2.0;

/// Fraction of the keep-alive timeout after which a warning is raised.
pub const DEFAULT_KEEP_ALIVE_WARN_AT: f64 = 2.0 / 3.0;

/// Settings for a [`Connection`](crate::connection::Connection).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Base endpoint, e.g. `http://localhost:16418/signalr`.
    pub url: String,
    /// Extra query string appended to the negotiate request.
    pub query_string: Option<String>,
    /// Enables the connection log sink.
    pub logging: bool,
    #[serde(rename = "reconnect_delay_ms", deserialize_with = "duration_from_millis")]
    pub reconnect_delay: Duration,
    pub keep_alive_timeout_count: f64,
    pub keep_alive_warn_at: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            query_string: None,
            logging: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            keep_alive_timeout_count: DEFAULT_KEEP_ALIVE_TIMEOUT_COUNT,
            keep_alive_warn_at: DEFAULT_KEEP_ALIVE_WARN_AT,
        }
    }
}

impl ConnectionConfig {
    /// Starts building a configuration for the given endpoint.
    pub fn builder(url: impl Into<String>) -> ConnectionConfigBuilder {
        ConnectionConfigBuilder {
            config: Self {
                url: url.into(),
                ..Self::default()
            },
        }
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn query_string(mut self, qs: impl Into<String>) -> Self {
        self.config.query_string = Some(qs.into());
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.config.logging = enabled;
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    pub fn keep_alive_timeout_count(mut self, count: f64) -> Self {
        self.config.keep_alive_timeout_count = count;
        self
    }

    pub fn keep_alive_warn_at(mut self, fraction: f64) -> Self {
        self.config.keep_alive_warn_at = fraction;
        self
    }

    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

fn duration_from_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let ms = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(ms))
}

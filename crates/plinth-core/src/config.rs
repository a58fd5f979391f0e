//! Application configuration consumed by the dispatch core.

use std::time::Duration;

use plinth_types::WEBSOCKET_CHANNEL;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log one line per request/connection at `plinth::monitoring`.
    #[serde(default = "default_monitoring")]
    pub monitoring: bool,
    #[serde(default)]
    pub fanout: FanoutConfig,
    /// Largest request body accepted before answering 413.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Broker URL. When unset, fanout stays inside this process.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on one broker connect plus publish.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

fn default_monitoring() -> bool {
    false
}

fn default_max_body_size() -> usize {
    2 * 1024 * 1024
}

fn default_channel() -> String {
    WEBSOCKET_CHANNEL.to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_publish_timeout_ms() -> u64 {
    2000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            monitoring: default_monitoring(),
            fanout: FanoutConfig::default(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            channel: default_channel(),
            poll_interval_ms: default_poll_interval_ms(),
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }
}

impl FanoutConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms.max(1))
    }
}

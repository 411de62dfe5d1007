//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Channel buffer size for coordinator requests
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,

    /// Delay between periodic fires in milliseconds
    #[serde(rename = "poll-interval-ms", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Error surface to open instead of the generic alert
    #[serde(rename = "id-modal-error", default, skip_serializing_if = "Option::is_none")]
    pub id_modal_error: Option<String>,
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    1000
}

fn default_poll_interval_ms() -> u64 {
    debug!("default_poll_interval_ms: called");
    5000
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            channel_buffer: 1000,
            poll_interval_ms: 5000,
            id_modal_error: None,
        }
    }
}

impl CoordinatorConfig {
    /// Get the periodic interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        debug!(poll_interval_ms = %self.poll_interval_ms, "CoordinatorConfig::poll_interval: called");
        Duration::from_millis(self.poll_interval_ms)
    }
}

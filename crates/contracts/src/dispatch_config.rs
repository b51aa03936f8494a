//! Dispatch configuration contracts that can be shared across crates.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Wire encoding used for commands and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// JSON (human-readable, larger)
    Json,
    /// Bincode (binary, compact)
    #[default]
    Bincode,
}

/// Dispatch engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DispatchConfig {
    /// Timeout applied to rounds that do not set their own (milliseconds)
    #[serde(default = "default_timeout_ms")]
    #[validate(range(min = 1))]
    pub default_timeout_ms: u64,

    /// Route every unfiltered round as a single group message
    #[serde(default)]
    pub force_multicast: bool,

    /// Mark outgoing messages out-of-band
    #[serde(default)]
    pub oob: bool,

    /// Capacity of the background replication queue
    #[serde(default = "default_async_queue_capacity")]
    #[validate(range(min = 1))]
    pub async_queue_capacity: usize,

    /// Encoding of commands and responses
    #[serde(default)]
    pub wire_format: WireFormat,
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_async_queue_capacity() -> usize {
    1024
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_timeout_ms(),
            force_multicast: false,
            oob: false,
            async_queue_capacity: default_async_queue_capacity(),
            wire_format: WireFormat::default(),
        }
    }
}

impl DispatchConfig {
    /// Default round timeout as a `Duration`
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

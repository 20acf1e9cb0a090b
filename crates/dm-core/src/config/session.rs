//! Management session transport settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Packet limit the platform accepts
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024;

/// Settings for the MQTT management session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// MQTT keep-alive interval
    #[serde(with = "duration_secs")]
    pub keep_alive: Duration,

    /// Capacity of the client request queue
    pub request_capacity: usize,

    /// Largest MQTT packet sent or accepted, in bytes
    pub max_packet_size: usize,

    /// Backoff between reconnection attempts
    pub backoff: BackoffConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(60),
            request_capacity: 64,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

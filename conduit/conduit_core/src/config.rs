//! Communication tunables and the node configuration seam.

use crate::node::NetworkNodeInformation;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing and limit settings for the network layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicationConfig {
    /// Timeout for ordinary requests (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Timeout for forwarding a request to the next hop (milliseconds)
    #[serde(default = "default_forwarding_timeout_ms")]
    pub forwarding_timeout_ms: u64,

    /// Interval between health-check rounds (milliseconds)
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// Upper bound of the random delay before each health check (milliseconds)
    #[serde(default = "default_health_check_max_jitter_ms")]
    pub health_check_max_jitter_ms: u64,

    /// Time to wait for a health-check echo (milliseconds)
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    /// Consecutive failed checks after which a connection is considered broken
    #[serde(default = "default_health_check_failure_limit")]
    pub health_check_failure_limit: u32,

    /// Service calls slower than this are logged (milliseconds)
    #[serde(default = "default_slow_service_call_threshold_ms")]
    pub slow_service_call_threshold_ms: u64,

    /// Concurrent per-node queries during aggregation
    #[serde(default = "default_max_parallel_queries")]
    pub max_parallel_queries: usize,

    #[serde(default = "default_max_request_hops")]
    pub max_request_hops: u32,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_forwarding_timeout_ms() -> u64 {
    30_000
}

fn default_health_check_interval_ms() -> u64 {
    15_000
}

fn default_health_check_max_jitter_ms() -> u64 {
    9_000
}

fn default_health_check_timeout_ms() -> u64 {
    5_000
}

fn default_health_check_failure_limit() -> u32 {
    3
}

fn default_slow_service_call_threshold_ms() -> u64 {
    10_000
}

fn default_max_parallel_queries() -> usize {
    8
}

fn default_max_request_hops() -> u32 {
    15
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            forwarding_timeout_ms: default_forwarding_timeout_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            health_check_max_jitter_ms: default_health_check_max_jitter_ms(),
            health_check_timeout_ms: default_health_check_timeout_ms(),
            health_check_failure_limit: default_health_check_failure_limit(),
            slow_service_call_threshold_ms: default_slow_service_call_threshold_ms(),
            max_parallel_queries: default_max_parallel_queries(),
            max_request_hops: default_max_request_hops(),
        }
    }
}

impl CommunicationConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    pub fn slow_service_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_service_call_threshold_ms)
    }
}

/// Supplies this node's identity and request timeout to the network layer.
pub trait NodeConfigurationProvider: Send + Sync {
    fn own_node_information(&self) -> NetworkNodeInformation;

    fn request_timeout(&self) -> Duration;
}

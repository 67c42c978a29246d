//! Request and stream limits.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Request and stream limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum time a stream may go without activity before it is failed.
    ///
    /// Activity is an upstream chunk, an egress push, or an explicit
    /// keepalive from the policy.
    #[serde(deserialize_with = "deserialize_duration")]
    pub stream_inactivity_timeout: Duration,

    /// Maximum number of messages accepted in a single request.
    pub max_request_messages: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            stream_inactivity_timeout: Duration::from_secs(30),
            max_request_messages: 1000,
        }
    }
}

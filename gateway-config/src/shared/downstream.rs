use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::ValidationError;

/// Largest accepted `max_concurrent_requests`, the permit limit of a tokio semaphore.
pub const MAX_CONCURRENT_REQUESTS_LIMIT: usize = usize::MAX >> 3;

/// Settings applied to every client bound to a downstream cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DownstreamConfig {
    /// Upper bound on a single downstream call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Maximum number of requests a single cluster client may have in flight.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Namespace whose UID identifies a downstream cluster.
    #[serde(default = "default_identity_namespace")]
    pub identity_namespace: String,
}

impl DownstreamConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_requests == 0 {
            return Err(ValidationError::MaxConcurrentRequestsZero);
        }
        if self.max_concurrent_requests > MAX_CONCURRENT_REQUESTS_LIMIT {
            return Err(ValidationError::MaxConcurrentRequestsTooLarge(
                MAX_CONCURRENT_REQUESTS_LIMIT,
            ));
        }

        Ok(())
    }
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
            identity_namespace: default_identity_namespace(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_requests() -> usize {
    1_000
}

fn default_identity_namespace() -> String {
    "kube-system".to_string()
}

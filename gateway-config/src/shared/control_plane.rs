use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::ValidationError;

/// Location and access policy of the credential store in the control-plane cluster.
///
/// The store is a single `ConfigMap` whose binary data maps every cluster code to its
/// serialized registration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ControlPlaneConfig {
    /// Namespace holding the credential store.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Name of the credential store resource.
    #[serde(default = "default_store_name")]
    pub store_name: String,
    /// Optional path to a JSON file of cluster records used to seed the store when it
    /// does not exist yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_path: Option<String>,
    /// Server-side timeout of a single watch request, after which the subscription is
    /// re-established.
    #[serde(default = "default_watch_timeout_secs")]
    pub watch_timeout_secs: u32,
    /// Interval between existence checks while the store is being established.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Number of read-modify-write attempts an admin mutation makes when the store
    /// changes underneath it.
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,
}

impl ControlPlaneConfig {
    pub const DEFAULT_NAMESPACE: &'static str = "hcnmp-system";
    pub const DEFAULT_STORE_NAME: &'static str = "hcnmp-cluster-info";

    /// Returns the interval between store existence checks.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.store_name.trim().is_empty() {
            return Err(ValidationError::StoreNameEmpty);
        }

        if self.max_write_attempts == 0 {
            return Err(ValidationError::MaxWriteAttemptsZero);
        }

        Ok(())
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            store_name: default_store_name(),
            seed_path: None,
            watch_timeout_secs: default_watch_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_write_attempts: default_max_write_attempts(),
        }
    }
}

fn default_namespace() -> String {
    ControlPlaneConfig::DEFAULT_NAMESPACE.to_string()
}

fn default_store_name() -> String {
    ControlPlaneConfig::DEFAULT_STORE_NAME.to_string()
}

fn default_watch_timeout_secs() -> u32 {
    290
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_write_attempts() -> u32 {
    3
}

use gateway_config::Config;
use gateway_config::shared::{
    BasicAuthConfig, ControlPlaneConfig, DownstreamConfig, RetryConfig, SentryConfig,
    ValidationError,
};
use serde::Deserialize;
use std::fmt;

/// Complete configuration for the gateway service.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Application server settings.
    pub application: ApplicationSettings,
    /// Location of the credential store in the control-plane cluster.
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    /// Settings shared by every downstream cluster client.
    #[serde(default)]
    pub downstream: DownstreamConfig,
    /// Backoff applied by the store watcher between retries.
    #[serde(default)]
    pub watcher_retry: RetryConfig,
    /// Credentials required on every `/apis` route.
    pub basic_auth: BasicAuthConfig,
    /// Optional Sentry configuration for error tracking.
    pub sentry: Option<SentryConfig>,
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.control_plane.validate()?;
        self.downstream.validate()?;
        self.basic_auth.validate()
    }
}

impl Config for ApiConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSettings {
    /// Host address the API listens on.
    pub host: String,
    /// Port number the API listens on.
    pub port: u16,
}

impl fmt::Display for ApplicationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "    host: {}", self.host)?;
        writeln!(f, "    port: {}", self.port)
    }
}

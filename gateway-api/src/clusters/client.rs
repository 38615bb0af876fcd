use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::clusters::identity::IdentityDiscovery;

/// Errors raised while building a cluster client or calling a downstream cluster.
#[derive(Debug, Error)]
pub enum ClusterClientError {
    #[error("The cluster credentials are invalid: {0}")]
    InvalidCredentials(String),

    #[error("The downstream cluster returned status {status}")]
    Upstream { status: StatusCode, body: Bytes },

    #[error("The downstream cluster did not answer within {0:?}")]
    Timeout(Duration),

    #[error("The downstream cluster could not be reached: {0}")]
    Transport(#[from] kube::Error),

    #[error("The downstream request is invalid: {0}")]
    InvalidRequest(String),

    #[error("The downstream response body could not be read: {0}")]
    Body(String),

    #[error("The downstream response could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("The downstream cluster did not report an identity for namespace {0}")]
    MissingIdentity(String),

    #[error("The cluster client is closed")]
    Closed,
}

/// A request addressed to the API server of one downstream cluster.
#[derive(Debug, Clone)]
pub struct DownstreamRequest {
    pub method: Method,
    /// Absolute API path, e.g. `/api/v1/namespaces`.
    pub path: String,
    /// Query parameters in order. Keys are not expected to repeat.
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl DownstreamRequest {
    /// Creates a `GET` request without query, headers or body.
    pub fn get(path: impl Into<String>) -> DownstreamRequest {
        DownstreamRequest {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// The raw answer of a downstream cluster.
#[derive(Debug, Clone)]
pub struct DownstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl DownstreamResponse {
    /// Turns a non-success status into [`ClusterClientError::Upstream`].
    pub fn error_for_status(self) -> Result<DownstreamResponse, ClusterClientError> {
        if self.status.is_success() {
            return Ok(self);
        }

        Err(ClusterClientError::Upstream {
            status: self.status,
            body: self.body,
        })
    }
}

/// Live handle to the API server of one downstream cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Executes `request` and returns the downstream status, headers and body.
    ///
    /// A non-success downstream status is returned as a response, not as an error.
    async fn execute(
        &self,
        request: DownstreamRequest,
    ) -> Result<DownstreamResponse, ClusterClientError>;
}

/// Builds cluster clients from raw credentials.
#[async_trait]
pub trait ClusterClientFactory: Send + Sync {
    async fn build(&self, credentials: &[u8]) -> Result<Arc<dyn ClusterClient>, ClusterClientError>;
}

/// A client together with the identity its cluster reported.
#[derive(Clone)]
pub struct ConnectedCluster {
    pub id: String,
    pub client: Arc<dyn ClusterClient>,
}

impl fmt::Debug for ConnectedCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedCluster")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Turns credentials into a [`ConnectedCluster`] by building a client and discovering the
/// identity of the cluster behind it.
#[derive(Clone)]
pub struct ClusterConnector {
    factory: Arc<dyn ClusterClientFactory>,
    discovery: Arc<dyn IdentityDiscovery>,
}

impl ClusterConnector {
    pub fn new(
        factory: Arc<dyn ClusterClientFactory>,
        discovery: Arc<dyn IdentityDiscovery>,
    ) -> ClusterConnector {
        ClusterConnector { factory, discovery }
    }

    pub async fn connect(&self, credentials: &[u8]) -> Result<ConnectedCluster, ClusterClientError> {
        let client = self.factory.build(credentials).await?;
        let id = self.discovery.discover(client.as_ref()).await?;

        Ok(ConnectedCluster { id, client })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_become_upstream_errors() {
        let response = DownstreamResponse {
            status: StatusCode::FORBIDDEN,
            headers: HeaderMap::new(),
            body: Bytes::from_static(b"{\"reason\":\"Forbidden\"}"),
        };

        match response.error_for_status() {
            Err(ClusterClientError::Upstream { status, body }) => {
                assert_eq!(status, StatusCode::FORBIDDEN);
                assert_eq!(body, Bytes::from_static(b"{\"reason\":\"Forbidden\"}"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn success_statuses_pass_through() {
        let response = DownstreamResponse {
            status: StatusCode::CREATED,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };

        assert!(response.error_for_status().is_ok());
    }
}

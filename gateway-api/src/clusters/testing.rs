//! Cluster doubles shared by the unit tests.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::clusters::client::{
    ClusterClient, ClusterClientError, ClusterClientFactory, ClusterConnector, DownstreamRequest,
    DownstreamResponse,
};
use crate::clusters::identity::SystemNamespaceIdentity;
use crate::clusters::info::ClusterInfo;

/// Builds clients from text credentials of the form `identity;version`. Credentials
/// starting with `invalid` are rejected. The first `unreachable` builds time out.
pub struct TextClusterFactory {
    unreachable: AtomicU32,
}

#[async_trait]
impl ClusterClientFactory for TextClusterFactory {
    async fn build(&self, credentials: &[u8]) -> Result<Arc<dyn ClusterClient>, ClusterClientError> {
        if self
            .unreachable
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(ClusterClientError::Timeout(Duration::from_secs(1)));
        }

        let text = String::from_utf8_lossy(credentials);
        if text.starts_with("invalid") {
            return Err(ClusterClientError::InvalidCredentials(text.into_owned()));
        }
        let identity = text.split(';').next().unwrap_or_default().to_string();

        Ok(Arc::new(NamespaceClient { identity }))
    }
}

/// Answers every request with a namespace carrying the cluster identity as its UID.
pub struct NamespaceClient {
    identity: String,
}

#[async_trait]
impl ClusterClient for NamespaceClient {
    async fn execute(
        &self,
        _request: DownstreamRequest,
    ) -> Result<DownstreamResponse, ClusterClientError> {
        let body = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": "kube-system", "uid": self.identity }
        });

        Ok(DownstreamResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(serde_json::to_vec(&body)?),
        })
    }
}

pub fn connector() -> ClusterConnector {
    unreachable_connector(0)
}

/// Connector whose first `failures` connection attempts time out.
pub fn unreachable_connector(failures: u32) -> ClusterConnector {
    ClusterConnector::new(
        Arc::new(TextClusterFactory {
            unreachable: AtomicU32::new(failures),
        }),
        Arc::new(SystemNamespaceIdentity::new("kube-system")),
    )
}

pub fn credentials(identity: &str, version: &str) -> Vec<u8> {
    format!("{identity};{version}").into_bytes()
}

/// Encoded store entry for `code` backed by the cluster `identity`.
pub fn entry(code: &str, identity: &str) -> (String, Vec<u8>) {
    let info = ClusterInfo {
        id: identity.to_string(),
        code: code.to_string(),
        credentials: credentials(identity, "v1"),
    };

    (code.to_string(), info.to_bytes().unwrap())
}

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;

use crate::clusters::client::{ClusterClient, ClusterClientError, DownstreamRequest};

/// Discovers the intrinsic identity of the cluster a client is bound to.
#[async_trait]
pub trait IdentityDiscovery: Send + Sync {
    async fn discover(&self, client: &dyn ClusterClient) -> Result<String, ClusterClientError>;
}

/// Uses the UID of a namespace every cluster has as the cluster identity.
#[derive(Debug, Clone)]
pub struct SystemNamespaceIdentity {
    namespace: String,
}

impl SystemNamespaceIdentity {
    pub fn new(namespace: impl Into<String>) -> SystemNamespaceIdentity {
        SystemNamespaceIdentity {
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl IdentityDiscovery for SystemNamespaceIdentity {
    async fn discover(&self, client: &dyn ClusterClient) -> Result<String, ClusterClientError> {
        let request = DownstreamRequest::get(format!("/api/v1/namespaces/{}", self.namespace));
        let response = client.execute(request).await?.error_for_status()?;

        let namespace: Namespace = serde_json::from_slice(&response.body)?;

        namespace
            .metadata
            .uid
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| ClusterClientError::MissingIdentity(self.namespace.clone()))
    }
}

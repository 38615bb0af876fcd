use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors emitted while talking to the credential store.
#[derive(Debug, Error)]
pub enum K8sError {
    /// A serialization or deserialization error while building or parsing resources.
    #[error("An error occurred in serde when dealing with K8s: {0}")]
    Serde(#[from] serde_json::error::Error),
    /// An error returned by the [`kube`] client when talking to the API server.
    #[error("An error occurred with kube when dealing with K8s: {0}")]
    Kube(#[from] kube::Error),
    /// A conditional write lost against a concurrent writer.
    #[error("The credential store was modified concurrently")]
    Conflict,
    /// The store was created concurrently by another writer.
    #[error("The credential store already exists")]
    AlreadyExists,
    /// The watch stream reported an error status.
    #[error("The credential store watch failed with status {code}: {message}")]
    Watch { code: u16, message: String },
}

/// Full contents of the credential store at one version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    /// Version token used for conditional writes. `None` writes unconditionally.
    pub resource_version: Option<String>,
    /// Serialized cluster records keyed by cluster code.
    pub entries: BTreeMap<String, Vec<u8>>,
}

/// A change notification emitted by [`K8sClient::watch_cluster_store`].
///
/// The end of the stream means the subscription was closed, either by the server-side
/// timeout or by a disconnect.
#[derive(Debug)]
pub enum StoreEvent {
    /// The store was created or modified; carries its new contents.
    Applied(StoreSnapshot),
    /// The store was deleted.
    Deleted,
    /// The subscription reported an error.
    Error(K8sError),
}

/// Operations on the credential store used by the gateway.
#[async_trait]
pub trait K8sClient: Send + Sync {
    /// Reads the store, returning `None` when it does not exist.
    async fn get_cluster_store(&self) -> Result<Option<StoreSnapshot>, K8sError>;

    /// Creates the store with the given entries.
    ///
    /// Fails with [`K8sError::AlreadyExists`] if it was created concurrently.
    async fn create_cluster_store(
        &self,
        entries: BTreeMap<String, Vec<u8>>,
    ) -> Result<StoreSnapshot, K8sError>;

    /// Overwrites the store with `snapshot`, conditioned on its resource version.
    ///
    /// Fails with [`K8sError::Conflict`] if the store changed since `snapshot` was read.
    async fn replace_cluster_store(
        &self,
        snapshot: &StoreSnapshot,
    ) -> Result<StoreSnapshot, K8sError>;

    /// Opens a change subscription on the store.
    ///
    /// The current contents are delivered as an initial [`StoreEvent::Applied`].
    async fn watch_cluster_store(&self) -> Result<BoxStream<'static, StoreEvent>, K8sError>;
}

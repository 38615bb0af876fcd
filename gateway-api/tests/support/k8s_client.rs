use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use gateway_api::clusters::info::ClusterInfo;
use gateway_api::k8s::{K8sClient, K8sError, StoreEvent, StoreSnapshot};
use tokio::sync::broadcast;

/// In-memory credential store with conditional writes and a live watch.
pub struct MockK8sClient {
    store: Mutex<Option<StoreSnapshot>>,
    version: AtomicUsize,
    writes: AtomicUsize,
    events: broadcast::Sender<StoreSnapshot>,
}

impl MockK8sClient {
    pub fn new() -> MockK8sClient {
        let (events, _) = broadcast::channel(64);

        MockK8sClient {
            store: Mutex::new(None),
            version: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            events,
        }
    }

    /// Creates a client whose store already holds `clusters`.
    pub fn with_clusters(clusters: &[ClusterInfo]) -> MockK8sClient {
        let client = MockK8sClient::new();
        let entries = clusters
            .iter()
            .map(|cluster| (cluster.code.clone(), cluster.to_bytes().unwrap()))
            .collect();
        client.publish(entries);

        client
    }

    /// Number of successful writes since the client was created.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current stored record of `code`.
    pub fn stored(&self, code: &str) -> Option<ClusterInfo> {
        let store = self.store.lock().unwrap();
        let value = store.as_ref()?.entries.get(code)?;

        Some(ClusterInfo::from_bytes(value).unwrap())
    }

    /// Overwrites the store as an out-of-band writer would.
    pub fn publish(&self, entries: BTreeMap<String, Vec<u8>>) -> StoreSnapshot {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = StoreSnapshot {
            resource_version: Some(version.to_string()),
            entries,
        };
        *self.store.lock().unwrap() = Some(snapshot.clone());
        let _ = self.events.send(snapshot.clone());

        snapshot
    }

    fn current(&self) -> Option<StoreSnapshot> {
        self.store.lock().unwrap().clone()
    }
}

impl Default for MockK8sClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl K8sClient for MockK8sClient {
    async fn get_cluster_store(&self) -> Result<Option<StoreSnapshot>, K8sError> {
        Ok(self.current())
    }

    async fn create_cluster_store(
        &self,
        entries: BTreeMap<String, Vec<u8>>,
    ) -> Result<StoreSnapshot, K8sError> {
        if self.current().is_some() {
            return Err(K8sError::AlreadyExists);
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.publish(entries))
    }

    async fn replace_cluster_store(
        &self,
        snapshot: &StoreSnapshot,
    ) -> Result<StoreSnapshot, K8sError> {
        let current_version = self
            .current()
            .and_then(|current| current.resource_version);
        if current_version.is_none() || current_version != snapshot.resource_version {
            return Err(K8sError::Conflict);
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.publish(snapshot.entries.clone()))
    }

    async fn watch_cluster_store(&self) -> Result<BoxStream<'static, StoreEvent>, K8sError> {
        // Subscribe first so that no write between the two steps is lost.
        let receiver = self.events.subscribe();
        let initial = stream::iter(self.current().map(StoreEvent::Applied));

        let updates = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(snapshot) => return Some((StoreEvent::Applied(snapshot), receiver)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(initial.chain(updates).boxed())
    }
}

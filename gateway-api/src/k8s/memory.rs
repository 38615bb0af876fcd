use async_trait::async_trait;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::k8s::{K8sClient, K8sError, StoreEvent, StoreSnapshot};

/// Credential store held in memory.
///
/// A watch replays the current contents and then reports every later write to the most
/// recently opened subscription.
#[derive(Default)]
pub struct MemoryK8sClient {
    store: Mutex<Option<StoreSnapshot>>,
    subscriber: Mutex<Option<UnboundedSender<StoreEvent>>>,
    version: AtomicUsize,
    writes: AtomicUsize,
    conflicts: AtomicU32,
    watch_failures: AtomicU32,
    watches: AtomicUsize,
}

impl MemoryK8sClient {
    pub fn with_entries(entries: BTreeMap<String, Vec<u8>>) -> MemoryK8sClient {
        let client = MemoryK8sClient::default();
        client.store_entries(entries);

        client
    }

    /// Makes the next `count` conditional writes fail as if another writer won.
    pub fn fail_writes(&self, count: u32) {
        self.conflicts.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` watch attempts fail.
    pub fn fail_watches(&self, count: u32) {
        self.watch_failures.store(count, Ordering::SeqCst);
    }

    /// Replaces the contents without a conditional check, like an out-of-band edit.
    pub fn apply(&self, entries: BTreeMap<String, Vec<u8>>) {
        self.store_entries(entries);
    }

    /// Deletes the store and notifies the open subscription.
    pub fn delete_store(&self) {
        *self.store.lock().unwrap() = None;
        self.notify(StoreEvent::Deleted);
    }

    /// Ends the open subscription without an event.
    pub fn close_watch(&self) {
        self.subscriber.lock().unwrap().take();
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn watches(&self) -> usize {
        self.watches.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<StoreSnapshot> {
        self.store.lock().unwrap().clone()
    }

    fn store_entries(&self, entries: BTreeMap<String, Vec<u8>>) -> StoreSnapshot {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = StoreSnapshot {
            resource_version: Some(version.to_string()),
            entries,
        };
        *self.store.lock().unwrap() = Some(snapshot.clone());
        self.notify(StoreEvent::Applied(snapshot.clone()));

        snapshot
    }

    fn notify(&self, event: StoreEvent) {
        if let Some(subscriber) = self.subscriber.lock().unwrap().as_ref() {
            let _ = subscriber.unbounded_send(event);
        }
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl K8sClient for MemoryK8sClient {
    async fn get_cluster_store(&self) -> Result<Option<StoreSnapshot>, K8sError> {
        Ok(self.snapshot())
    }

    async fn create_cluster_store(
        &self,
        entries: BTreeMap<String, Vec<u8>>,
    ) -> Result<StoreSnapshot, K8sError> {
        if self.snapshot().is_some() {
            return Err(K8sError::AlreadyExists);
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.store_entries(entries))
    }

    async fn replace_cluster_store(
        &self,
        snapshot: &StoreSnapshot,
    ) -> Result<StoreSnapshot, K8sError> {
        if Self::take_failure(&self.conflicts) {
            return Err(K8sError::Conflict);
        }

        let current = self.snapshot().and_then(|current| current.resource_version);
        if current.is_none() || current != snapshot.resource_version {
            return Err(K8sError::Conflict);
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.store_entries(snapshot.entries.clone()))
    }

    async fn watch_cluster_store(&self) -> Result<BoxStream<'static, StoreEvent>, K8sError> {
        self.watches.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.watch_failures) {
            return Err(K8sError::Watch {
                code: 500,
                message: "watch unavailable".to_string(),
            });
        }

        let (tx, rx) = unbounded();
        let mut subscriber = self.subscriber.lock().unwrap();
        let initial = stream::iter(self.snapshot().map(StoreEvent::Applied));
        *subscriber = Some(tx);

        Ok(initial.chain(rx).boxed())
    }
}

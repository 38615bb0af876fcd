use futures::StreamExt;
use futures::future::try_join_all;
use futures::stream::BoxStream;
use gateway_config::shared::RetryConfig;
use gateway_telemetry::metrics::{REGISTRY_REBUILDS_TOTAL, WATCHER_RETRIES_TOTAL};
use metrics::counter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::clusters::client::{ClusterClientError, ClusterConnector};
use crate::clusters::info::{ClusterInfo, ClusterInfoError};
use crate::clusters::registry::{ClusterRegistry, RegistryEntry, RegistryError};
use crate::clusters::store::ensure_store;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::concurrency::signal::CoalescingSignal;
use crate::k8s::{K8sClient, StoreEvent, StoreSnapshot};

type StoreEvents = BoxStream<'static, StoreEvent>;

#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("The stored record of cluster {code} is invalid: {source}")]
    Decode {
        code: String,
        source: ClusterInfoError,
    },

    #[error("The cluster {code} could not be connected: {source}")]
    Connect {
        code: String,
        source: ClusterClientError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Timing and bootstrap settings of the [`ControlPlaneWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Interval between attempts to find or create the credential store.
    pub poll_interval: Duration,
    /// Backoff between watch and sync retries.
    pub retry: RetryConfig,
    /// Seed file used when the credential store has to be created.
    pub seed_path: Option<PathBuf>,
}

/// Keeps the [`ClusterRegistry`] in line with the credential store.
///
/// Every change of the store rebuilds the whole registry from the store contents. A
/// rebuild either connects every stored cluster or changes nothing.
#[derive(Clone)]
pub struct ControlPlaneWatcher {
    k8s_client: Arc<dyn K8sClient>,
    registry: Arc<ClusterRegistry>,
    connector: ClusterConnector,
    settings: WatcherSettings,
}

impl ControlPlaneWatcher {
    pub fn new(
        k8s_client: Arc<dyn K8sClient>,
        registry: Arc<ClusterRegistry>,
        connector: ClusterConnector,
        settings: WatcherSettings,
    ) -> ControlPlaneWatcher {
        ControlPlaneWatcher {
            k8s_client,
            registry,
            connector,
            settings,
        }
    }

    /// Spawns the watch loop on the current runtime.
    pub fn start(self) -> WatcherHandle {
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let task = WatcherTask {
            watcher: self,
            shutdown_rx,
            retry_watch: CoalescingSignal::new(),
            retry_sync: CoalescingSignal::new(),
            watch_attempts: 0,
            sync_attempts: 0,
        };

        WatcherHandle {
            shutdown_tx,
            handle: tokio::spawn(task.run()),
        }
    }

    /// Replaces the registry with the clusters stored in `snapshot`.
    ///
    /// Clients are built concurrently. Any failure aborts the rebuild and leaves the
    /// registry untouched. When two codes resolve to the same cluster identity only the
    /// first code in order is registered. Returns the number of registered clusters.
    pub async fn rebuild(&self, snapshot: &StoreSnapshot) -> Result<usize, RebuildError> {
        let result = self.try_rebuild(snapshot).await;

        let outcome = if result.is_ok() { "success" } else { "failure" };
        counter!(REGISTRY_REBUILDS_TOTAL, "outcome" => outcome).increment(1);

        result
    }

    async fn try_rebuild(&self, snapshot: &StoreSnapshot) -> Result<usize, RebuildError> {
        let mut records = Vec::with_capacity(snapshot.entries.len());
        for (code, value) in &snapshot.entries {
            let info = ClusterInfo::from_bytes(value).map_err(|source| RebuildError::Decode {
                code: code.clone(),
                source,
            })?;
            records.push((code.clone(), info.credentials));
        }

        let connected = try_join_all(records.iter().map(|(code, credentials)| async move {
            self.connector
                .connect(credentials)
                .await
                .map(|cluster| (code.clone(), cluster))
                .map_err(|source| RebuildError::Connect {
                    code: code.clone(),
                    source,
                })
        }))
        .await?;

        let mut owners: HashMap<String, String> = HashMap::with_capacity(connected.len());
        let mut entries = Vec::with_capacity(connected.len());
        for (code, cluster) in connected {
            if let Some(owner) = owners.get(&cluster.id) {
                warn!(
                    code = %code,
                    owner = %owner,
                    id = %cluster.id,
                    "skipping cluster whose identity is already registered under another code"
                );
                continue;
            }

            owners.insert(cluster.id.clone(), code.clone());
            entries.push(RegistryEntry {
                code,
                id: cluster.id,
                client: cluster.client,
            });
        }

        let clusters = entries.len();
        self.registry.replace_all(entries)?;

        info!(clusters, "rebuilt cluster registry");

        Ok(clusters)
    }
}

/// Handle to a running [`ControlPlaneWatcher`].
#[derive(Debug)]
pub struct WatcherHandle {
    shutdown_tx: ShutdownTx,
    handle: JoinHandle<()>,
}

impl WatcherHandle {
    /// Asks the watcher to stop at its next suspension point.
    pub fn shutdown(&self) {
        if self.shutdown_tx.shutdown().is_err() {
            debug!("store watcher already stopped");
        }
    }

    pub async fn wait(self) -> Result<(), JoinError> {
        self.handle.await
    }
}

enum WatcherState {
    /// Finding or creating the store, then opening a subscription.
    Establishing,
    /// Waiting for the next store event.
    Watching(StoreEvents),
    /// Rebuilding the registry from a store snapshot.
    Rebuilding(StoreSnapshot, StoreEvents),
    /// Waiting to re-establish a lost subscription.
    RetryWatch,
    /// Waiting to retry a failed rebuild while still listening for store events.
    RetrySync(StoreEvents),
}

enum Wake {
    Timer,
    Event(Option<StoreEvent>),
}

struct WatcherTask {
    watcher: ControlPlaneWatcher,
    shutdown_rx: ShutdownRx,
    retry_watch: CoalescingSignal,
    retry_sync: CoalescingSignal,
    watch_attempts: u32,
    sync_attempts: u32,
}

impl WatcherTask {
    async fn run(mut self) {
        let mut state = WatcherState::Establishing;

        loop {
            let next = match state {
                WatcherState::Establishing => self.establish().await,
                WatcherState::Watching(events) => self.watch(events).await,
                WatcherState::Rebuilding(snapshot, events) => {
                    Some(self.rebuild(snapshot, events).await)
                }
                WatcherState::RetryWatch => self.retry_watch().await,
                WatcherState::RetrySync(events) => self.retry_sync(events).await,
            };

            match next {
                Some(next) => state = next,
                None => {
                    info!("store watcher stopped");
                    return;
                }
            }
        }
    }

    async fn establish(&mut self) -> Option<WatcherState> {
        let watcher = self.watcher.clone();

        loop {
            match ensure_store(
                watcher.k8s_client.as_ref(),
                watcher.settings.seed_path.as_deref(),
            )
            .await
            {
                Ok(_) => break,
                Err(err) => {
                    warn!(error = %err, "credential store is not available");
                    if self.sleep_or_shutdown(watcher.settings.poll_interval).await {
                        return None;
                    }
                }
            }
        }

        match watcher.k8s_client.watch_cluster_store().await {
            Ok(events) => {
                info!("watching credential store");
                Some(WatcherState::Watching(events))
            }
            Err(err) => {
                warn!(error = %err, "failed to open credential store watch");
                self.request_retry_watch();
                Some(WatcherState::RetryWatch)
            }
        }
    }

    async fn watch(&mut self, mut events: StoreEvents) -> Option<WatcherState> {
        let event = tokio::select! {
            biased;
            _ = self.shutdown_rx.changed() => return None,
            event = events.next() => event,
        };

        Some(self.on_event(event, events))
    }

    fn on_event(&mut self, event: Option<StoreEvent>, events: StoreEvents) -> WatcherState {
        match event {
            Some(StoreEvent::Applied(snapshot)) => {
                self.watch_attempts = 0;
                WatcherState::Rebuilding(snapshot, events)
            }
            Some(StoreEvent::Deleted) => {
                warn!("credential store was deleted");
                self.request_retry_watch();
                WatcherState::RetryWatch
            }
            Some(StoreEvent::Error(err)) => {
                warn!(error = %err, "credential store watch failed");
                self.request_retry_watch();
                WatcherState::RetryWatch
            }
            None => {
                debug!("credential store watch closed");
                self.request_retry_watch();
                WatcherState::RetryWatch
            }
        }
    }

    async fn rebuild(&mut self, snapshot: StoreSnapshot, events: StoreEvents) -> WatcherState {
        match self.watcher.rebuild(&snapshot).await {
            Ok(_) => {
                self.sync_attempts = 0;
                if self.retry_sync.take() {
                    debug!("pending sync retry satisfied by rebuild");
                }
                WatcherState::Watching(events)
            }
            Err(err) => {
                error!(error = %err, "registry rebuild failed, keeping the current clusters");
                self.request_retry_sync();
                WatcherState::RetrySync(events)
            }
        }
    }

    async fn retry_watch(&mut self) -> Option<WatcherState> {
        let delay = self.watcher.settings.retry.delay_for_attempt(self.watch_attempts);
        self.watch_attempts = self.watch_attempts.saturating_add(1);

        if self.sleep_or_shutdown(delay).await {
            return None;
        }
        self.retry_watch.take();

        Some(WatcherState::Establishing)
    }

    async fn retry_sync(&mut self, mut events: StoreEvents) -> Option<WatcherState> {
        let delay = self.watcher.settings.retry.delay_for_attempt(self.sync_attempts);
        self.sync_attempts = self.sync_attempts.saturating_add(1);

        let wake = tokio::select! {
            biased;
            _ = self.shutdown_rx.changed() => return None,
            event = events.next() => Wake::Event(event),
            _ = tokio::time::sleep(delay) => Wake::Timer,
        };

        // A newer store event replaces the retry. The request stays pending until a
        // rebuild succeeds, so further failures coalesce into it.
        if let Wake::Event(event) = wake {
            return Some(self.on_event(event, events));
        }

        self.retry_sync.take();
        match self.watcher.k8s_client.get_cluster_store().await {
            Ok(Some(snapshot)) => Some(WatcherState::Rebuilding(snapshot, events)),
            Ok(None) => {
                warn!("credential store is missing, re-establishing");
                self.request_retry_watch();
                Some(WatcherState::RetryWatch)
            }
            Err(err) => {
                warn!(error = %err, "failed to read credential store");
                self.request_retry_sync();
                Some(WatcherState::RetrySync(events))
            }
        }
    }

    fn request_retry_watch(&self) {
        if self.retry_watch.request() {
            counter!(WATCHER_RETRIES_TOTAL, "kind" => "watch").increment(1);
        } else {
            debug!("watch retry already pending");
        }
    }

    fn request_retry_sync(&self) {
        if self.retry_sync.request() {
            counter!(WATCHER_RETRIES_TOTAL, "kind" => "sync").increment(1);
        } else {
            debug!("sync retry already pending");
        }
    }

    /// Sleeps for `duration`. Returns `true` if shutdown was requested meanwhile.
    async fn sleep_or_shutdown(&mut self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown_rx.changed() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }
}

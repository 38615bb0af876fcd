use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::clusters::client::{ClusterClientError, ClusterConnector};
use crate::clusters::info::{ClusterInfo, ClusterInfoError};
use crate::clusters::registry::ClusterRegistry;
use crate::clusters::store::{StoreError, ensure_store};
use crate::k8s::{K8sClient, K8sError, StoreSnapshot};

#[derive(Debug, Error)]
pub enum ClusterAdminError {
    #[error("The cluster {0} already exists")]
    CodeExists(String),

    #[error("The cluster is already registered with code {0}")]
    IdentityInUse(String),

    #[error("The cluster {0} was not found")]
    ClusterNotFound(String),

    #[error(transparent)]
    Downstream(#[from] ClusterClientError),

    #[error("The stored record of cluster {code} is invalid: {source}")]
    CorruptRecord {
        code: String,
        source: ClusterInfoError,
    },

    #[error("The cluster record could not be encoded: {0}")]
    Encode(ClusterInfoError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("The credential store kept changing, gave up after {0} attempts")]
    StoreContention(u32),
}

impl From<K8sError> for ClusterAdminError {
    fn from(err: K8sError) -> Self {
        ClusterAdminError::Store(err.into())
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterMutation {
    /// The credential store was written.
    Written,
    /// The stored credentials were already identical; nothing was written.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegisterMode {
    Create,
    Update,
    Apply,
}

fn decode(code: &str, value: &[u8]) -> Result<ClusterInfo, ClusterAdminError> {
    ClusterInfo::from_bytes(value).map_err(|source| ClusterAdminError::CorruptRecord {
        code: code.to_string(),
        source,
    })
}

/// Registration management on top of the credential store.
///
/// Writes only touch the store. The registry catches up once the store watcher has seen
/// the change, so a new registration becomes routable shortly after it is accepted.
pub struct ClusterAdmin {
    k8s_client: Arc<dyn K8sClient>,
    registry: Arc<ClusterRegistry>,
    connector: ClusterConnector,
    seed_path: Option<PathBuf>,
    max_write_attempts: u32,
}

impl ClusterAdmin {
    pub fn new(
        k8s_client: Arc<dyn K8sClient>,
        registry: Arc<ClusterRegistry>,
        connector: ClusterConnector,
        seed_path: Option<PathBuf>,
        max_write_attempts: u32,
    ) -> ClusterAdmin {
        ClusterAdmin {
            k8s_client,
            registry,
            connector,
            seed_path,
            max_write_attempts,
        }
    }

    /// Registers a new cluster under `code`.
    pub async fn create(
        &self,
        code: &str,
        credentials: &[u8],
    ) -> Result<ClusterMutation, ClusterAdminError> {
        self.register(code, credentials, RegisterMode::Create).await
    }

    /// Replaces the credentials of the live cluster `code`.
    pub async fn update(
        &self,
        code: &str,
        credentials: &[u8],
    ) -> Result<ClusterMutation, ClusterAdminError> {
        self.register(code, credentials, RegisterMode::Update).await
    }

    /// Registers `code` or replaces its credentials, whether or not it is live yet.
    pub async fn apply(
        &self,
        code: &str,
        credentials: &[u8],
    ) -> Result<ClusterMutation, ClusterAdminError> {
        self.register(code, credentials, RegisterMode::Apply).await
    }

    /// Returns the stored record of the live cluster `code`.
    pub async fn read(&self, code: &str) -> Result<ClusterInfo, ClusterAdminError> {
        if self.registry.lookup_by_code(code).is_none() {
            return Err(ClusterAdminError::ClusterNotFound(code.to_string()));
        }

        let snapshot = self
            .k8s_client
            .get_cluster_store()
            .await?
            .ok_or_else(|| ClusterAdminError::ClusterNotFound(code.to_string()))?;
        let value = snapshot
            .entries
            .get(code)
            .ok_or_else(|| ClusterAdminError::ClusterNotFound(code.to_string()))?;

        decode(code, value)
    }

    /// Returns every stored record, ordered by code.
    pub async fn list(&self) -> Result<Vec<ClusterInfo>, ClusterAdminError> {
        let Some(snapshot) = self.k8s_client.get_cluster_store().await? else {
            return Ok(Vec::new());
        };

        snapshot
            .entries
            .iter()
            .map(|(code, value)| decode(code, value))
            .collect()
    }

    /// Removes the live cluster `code`.
    pub async fn delete(&self, code: &str) -> Result<(), ClusterAdminError> {
        if self.registry.lookup_by_code(code).is_none() {
            return Err(ClusterAdminError::ClusterNotFound(code.to_string()));
        }

        for attempt in 1..=self.max_write_attempts {
            let mut snapshot = self
                .k8s_client
                .get_cluster_store()
                .await?
                .ok_or_else(|| ClusterAdminError::ClusterNotFound(code.to_string()))?;

            if snapshot.entries.remove(code).is_none() {
                return Err(ClusterAdminError::ClusterNotFound(code.to_string()));
            }

            if self.commit(&snapshot, attempt).await? {
                info!(code, "removed cluster");
                return Ok(());
            }
        }

        Err(ClusterAdminError::StoreContention(self.max_write_attempts))
    }

    async fn register(
        &self,
        code: &str,
        credentials: &[u8],
        mode: RegisterMode,
    ) -> Result<ClusterMutation, ClusterAdminError> {
        let live = self.registry.lookup_by_code(code).is_some();
        match mode {
            RegisterMode::Create if live => {
                return Err(ClusterAdminError::CodeExists(code.to_string()));
            }
            RegisterMode::Update if !live => {
                return Err(ClusterAdminError::ClusterNotFound(code.to_string()));
            }
            _ => {}
        }

        // Discovered once and reused when a conflicting write forces another round.
        let mut identity: Option<String> = None;

        for attempt in 1..=self.max_write_attempts {
            let mut snapshot = self.load_for_register(code, mode).await?;

            match snapshot.entries.get(code) {
                Some(_) if mode == RegisterMode::Create => {
                    return Err(ClusterAdminError::CodeExists(code.to_string()));
                }
                Some(value) => {
                    if decode(code, value)?.credentials == credentials {
                        debug!(code, "credentials unchanged, skipping write");
                        return Ok(ClusterMutation::Unchanged);
                    }
                }
                None if mode == RegisterMode::Update => {
                    return Err(ClusterAdminError::ClusterNotFound(code.to_string()));
                }
                None => {}
            }

            let id = match &identity {
                Some(id) => id.clone(),
                None => {
                    let cluster = self.connector.connect(credentials).await?;
                    identity = Some(cluster.id.clone());
                    cluster.id
                }
            };

            for (other, value) in &snapshot.entries {
                if other != code && decode(other, value)?.id == id {
                    return Err(ClusterAdminError::IdentityInUse(other.clone()));
                }
            }

            let record = ClusterInfo {
                id,
                code: code.to_string(),
                credentials: credentials.to_vec(),
            };
            let value = record.to_bytes().map_err(ClusterAdminError::Encode)?;
            snapshot.entries.insert(code.to_string(), value);

            if self.commit(&snapshot, attempt).await? {
                info!(code, id = %record.id, mode = ?mode, "stored cluster credentials");
                return Ok(ClusterMutation::Written);
            }
        }

        Err(ClusterAdminError::StoreContention(self.max_write_attempts))
    }

    async fn load_for_register(
        &self,
        code: &str,
        mode: RegisterMode,
    ) -> Result<StoreSnapshot, ClusterAdminError> {
        match mode {
            RegisterMode::Update => self
                .k8s_client
                .get_cluster_store()
                .await?
                .ok_or_else(|| ClusterAdminError::ClusterNotFound(code.to_string())),
            RegisterMode::Create | RegisterMode::Apply => {
                Ok(ensure_store(self.k8s_client.as_ref(), self.seed_path.as_deref()).await?)
            }
        }
    }

    /// Writes `snapshot` conditionally. Returns `false` if a concurrent write won.
    async fn commit(&self, snapshot: &StoreSnapshot, attempt: u32) -> Result<bool, ClusterAdminError> {
        match self.k8s_client.replace_cluster_store(snapshot).await {
            Ok(_) => Ok(true),
            Err(K8sError::Conflict) => {
                debug!(attempt, "credential store changed during write");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

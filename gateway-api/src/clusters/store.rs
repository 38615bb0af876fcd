use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::clusters::info::{ClusterInfo, ClusterInfoError};
use crate::k8s::{K8sClient, K8sError, StoreSnapshot};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    K8s(#[from] K8sError),

    #[error("The seed file {path} could not be read: {source}")]
    SeedRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("The seed file {path} is not a JSON list of clusters: {source}")]
    SeedParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("The seeded cluster {code} could not be encoded: {source}")]
    SeedEncode {
        code: String,
        source: ClusterInfoError,
    },

    #[error("The credential store disappeared right after being created")]
    Vanished,
}

/// Reads the clusters listed in a seed file and encodes them as store entries.
async fn read_seed(path: &Path) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
    let contents = tokio::fs::read(path)
        .await
        .map_err(|source| StoreError::SeedRead {
            path: path.to_path_buf(),
            source,
        })?;

    let clusters: Vec<ClusterInfo> =
        serde_json::from_slice(&contents).map_err(|source| StoreError::SeedParse {
            path: path.to_path_buf(),
            source,
        })?;

    if clusters.is_empty() {
        warn!(path = %path.display(), "seed file lists no clusters");
    }

    let mut entries = BTreeMap::new();
    for cluster in clusters {
        let value = cluster
            .to_bytes()
            .map_err(|source| StoreError::SeedEncode {
                code: cluster.code.clone(),
                source,
            })?;
        entries.insert(cluster.code, value);
    }

    Ok(entries)
}

/// Returns the current credential store, creating it first if it does not exist.
///
/// A new store is populated from `seed_path` when one is configured, and is empty
/// otherwise. Losing a creation race to another writer is not an error.
pub async fn ensure_store(
    k8s_client: &dyn K8sClient,
    seed_path: Option<&Path>,
) -> Result<StoreSnapshot, StoreError> {
    if let Some(snapshot) = k8s_client.get_cluster_store().await? {
        return Ok(snapshot);
    }

    let entries = match seed_path {
        Some(path) => read_seed(path).await?,
        None => BTreeMap::new(),
    };
    let seeded = entries.len();

    match k8s_client.create_cluster_store(entries).await {
        Ok(snapshot) => {
            info!(seeded, "created credential store");
            Ok(snapshot)
        }
        Err(K8sError::AlreadyExists) => k8s_client
            .get_cluster_store()
            .await?
            .ok_or(StoreError::Vanished),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clusters::testing::{credentials, entry};
    use crate::k8s::memory::MemoryK8sClient;

    fn seed_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.json", std::process::id()));
        std::fs::write(&path, contents).unwrap();

        path
    }

    #[tokio::test]
    async fn existing_store_is_returned_untouched() {
        let client = MemoryK8sClient::with_entries(BTreeMap::from([entry("prod", "cluster-a")]));

        let snapshot = ensure_store(&client, None).await.unwrap();

        assert!(snapshot.entries.contains_key("prod"));
        assert_eq!(client.writes(), 0);
    }

    #[tokio::test]
    async fn missing_store_is_created_empty() {
        let client = MemoryK8sClient::default();

        let snapshot = ensure_store(&client, None).await.unwrap();

        assert!(snapshot.entries.is_empty());
        assert_eq!(client.writes(), 1);
        assert!(client.snapshot().is_some());
    }

    #[tokio::test]
    async fn missing_store_is_seeded_from_file() {
        let cluster = ClusterInfo {
            id: "cluster-a".to_string(),
            code: "prod".to_string(),
            credentials: credentials("cluster-a", "v1"),
        };
        let path = seed_file(
            "gateway-seed",
            &serde_json::to_string(&vec![cluster.clone()]).unwrap(),
        );
        let client = MemoryK8sClient::default();

        let snapshot = ensure_store(&client, Some(&path)).await.unwrap();

        let stored = ClusterInfo::from_bytes(&snapshot.entries["prod"]).unwrap();
        assert_eq!(stored, cluster);
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn malformed_seed_file_is_an_error() {
        let path = seed_file("gateway-bad-seed", "{\"not\":\"a list\"}");
        let client = MemoryK8sClient::default();

        let err = ensure_store(&client, Some(&path)).await.unwrap_err();

        assert!(matches!(err, StoreError::SeedParse { .. }));
        assert!(client.snapshot().is_none());
        std::fs::remove_file(path).unwrap();
    }
}

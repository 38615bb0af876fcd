use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use gateway_config::shared::ControlPlaneConfig;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{PostParams, WatchEvent, WatchParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use tracing::debug;

use crate::k8s::{K8sClient, K8sError, StoreEvent, StoreSnapshot};

/// Status code returned by the API server when a write loses a race.
const CONFLICT_STATUS: u16 = 409;

/// Resource version at which a watch starts so that the current state is replayed.
const WATCH_FROM_CURRENT_STATE: &str = "0";

/// [`K8sClient`] backed by the control-plane API server.
pub struct HttpK8sClient {
    config_maps: Api<ConfigMap>,
    store_name: String,
    watch_timeout_secs: u32,
}

impl HttpK8sClient {
    /// Creates a client from the ambient Kubernetes configuration.
    pub async fn new(config: &ControlPlaneConfig) -> Result<HttpK8sClient, K8sError> {
        let client = Client::try_default().await?;

        Ok(HttpK8sClient {
            config_maps: Api::namespaced(client, &config.namespace),
            store_name: config.store_name.clone(),
            watch_timeout_secs: config.watch_timeout_secs,
        })
    }

    fn to_config_map(&self, snapshot: &StoreSnapshot) -> ConfigMap {
        let binary_data = snapshot
            .entries
            .iter()
            .map(|(code, value)| (code.clone(), ByteString(value.clone())))
            .collect();

        ConfigMap {
            metadata: ObjectMeta {
                name: Some(self.store_name.clone()),
                resource_version: snapshot.resource_version.clone(),
                ..ObjectMeta::default()
            },
            binary_data: Some(binary_data),
            ..ConfigMap::default()
        }
    }
}

fn to_snapshot(config_map: ConfigMap) -> StoreSnapshot {
    let entries = config_map
        .binary_data
        .unwrap_or_default()
        .into_iter()
        .map(|(code, value)| (code, value.0))
        .collect();

    StoreSnapshot {
        resource_version: config_map.metadata.resource_version,
        entries,
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == CONFLICT_STATUS)
}

#[async_trait]
impl K8sClient for HttpK8sClient {
    async fn get_cluster_store(&self) -> Result<Option<StoreSnapshot>, K8sError> {
        let config_map = self.config_maps.get_opt(&self.store_name).await?;

        Ok(config_map.map(to_snapshot))
    }

    async fn create_cluster_store(
        &self,
        entries: BTreeMap<String, Vec<u8>>,
    ) -> Result<StoreSnapshot, K8sError> {
        let config_map = self.to_config_map(&StoreSnapshot {
            resource_version: None,
            entries,
        });

        match self
            .config_maps
            .create(&PostParams::default(), &config_map)
            .await
        {
            Ok(created) => Ok(to_snapshot(created)),
            Err(err) if is_conflict(&err) => Err(K8sError::AlreadyExists),
            Err(err) => Err(err.into()),
        }
    }

    async fn replace_cluster_store(
        &self,
        snapshot: &StoreSnapshot,
    ) -> Result<StoreSnapshot, K8sError> {
        let config_map = self.to_config_map(snapshot);

        match self
            .config_maps
            .replace(&self.store_name, &PostParams::default(), &config_map)
            .await
        {
            Ok(replaced) => Ok(to_snapshot(replaced)),
            Err(err) if is_conflict(&err) => Err(K8sError::Conflict),
            Err(err) => Err(err.into()),
        }
    }

    async fn watch_cluster_store(&self) -> Result<BoxStream<'static, StoreEvent>, K8sError> {
        let params = WatchParams::default()
            .fields(&format!("metadata.name={}", self.store_name))
            .timeout(self.watch_timeout_secs);

        let events = self
            .config_maps
            .watch(&params, WATCH_FROM_CURRENT_STATE)
            .await?;

        debug!(store = %self.store_name, "opened credential store watch");

        let events = events.filter_map(|event| async move {
            match event {
                Ok(WatchEvent::Added(config_map)) | Ok(WatchEvent::Modified(config_map)) => {
                    Some(StoreEvent::Applied(to_snapshot(config_map)))
                }
                Ok(WatchEvent::Deleted(_)) => Some(StoreEvent::Deleted),
                Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(response)) => Some(StoreEvent::Error(K8sError::Watch {
                    code: response.code,
                    message: response.message,
                })),
                Err(err) => Some(StoreEvent::Error(err.into())),
            }
        });

        Ok(events.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_map_binary_data_becomes_snapshot_entries() {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some("store".to_string()),
                resource_version: Some("42".to_string()),
                ..ObjectMeta::default()
            },
            binary_data: Some(BTreeMap::from([(
                "prod".to_string(),
                ByteString(b"{}".to_vec()),
            )])),
            ..ConfigMap::default()
        };

        let snapshot = to_snapshot(config_map);

        assert_eq!(snapshot.resource_version.as_deref(), Some("42"));
        assert_eq!(snapshot.entries.get("prod"), Some(&b"{}".to_vec()));
    }

    #[test]
    fn config_map_without_binary_data_is_empty() {
        let snapshot = to_snapshot(ConfigMap::default());

        assert!(snapshot.entries.is_empty());
        assert!(snapshot.resource_version.is_none());
    }
}

//! Read and restart workloads on a downstream cluster.
//!
//! Everything here goes through [`ClusterClient::execute`], the same capability the
//! request proxy uses.

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use k8s_openapi::List;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ListMeta, ObjectMeta};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::clusters::client::{ClusterClient, ClusterClientError, DownstreamRequest};

/// Pod template label stamped to trigger a rollout.
pub const RESTART_LABEL: &str = "hcnmp.io/restart";

const STRATEGIC_MERGE_PATCH: &str = "application/strategic-merge-patch+json";

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error(transparent)]
    Downstream(#[from] ClusterClientError),

    #[error("The downstream object could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("The selector operator {0} is not supported")]
    UnsupportedSelector(String),

    #[error("The deployment {namespace}/{name} was not restarted")]
    RestartNotApplied { namespace: String, name: String },

    #[error("The deployment {namespace}/{name} did not become ready within {timeout:?}")]
    RestartTimedOut {
        namespace: String,
        name: String,
        timeout: Duration,
    },
}

/// How long a restart waits for its rollout and how often it checks.
#[derive(Debug, Clone, Copy)]
pub struct RestartWait {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RestartWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(2),
        }
    }
}

async fn fetch<T: DeserializeOwned>(
    client: &dyn ClusterClient,
    request: DownstreamRequest,
) -> Result<T, WorkloadError> {
    let response = client.execute(request).await?.error_for_status()?;

    Ok(serde_json::from_slice(&response.body)?)
}

fn deployment_path(namespace: &str, name: &str) -> String {
    format!("/apis/apps/v1/namespaces/{namespace}/deployments/{name}")
}

fn empty_list<T: k8s_openapi::ListableResource>() -> List<T> {
    List {
        items: Vec::new(),
        metadata: ListMeta::default(),
    }
}

/// Returns the UID of the controlling owner of an object.
fn controller_uid(metadata: &ObjectMeta) -> Option<&str> {
    metadata
        .owner_references
        .iter()
        .flatten()
        .find(|owner| owner.controller == Some(true))
        .map(|owner| owner.uid.as_str())
}

/// Renders a label selector in the query syntax of the API server.
pub fn selector_query(selector: &LabelSelector) -> Result<String, WorkloadError> {
    let mut terms = Vec::new();

    for (key, value) in selector.match_labels.iter().flatten() {
        terms.push(format!("{key}={value}"));
    }

    for expression in selector.match_expressions.iter().flatten() {
        let values = expression.values.as_deref().unwrap_or_default().join(",");
        let term = match expression.operator.as_str() {
            "In" => format!("{} in ({values})", expression.key),
            "NotIn" => format!("{} notin ({values})", expression.key),
            "Exists" => expression.key.clone(),
            "DoesNotExist" => format!("!{}", expression.key),
            other => return Err(WorkloadError::UnsupportedSelector(other.to_string())),
        };
        terms.push(term);
    }

    Ok(terms.join(","))
}

/// Whether the latest revision of a deployment is fully rolled out and available.
pub fn deployment_is_ready(deployment: &Deployment) -> bool {
    let (Some(spec), Some(status)) = (&deployment.spec, &deployment.status) else {
        return false;
    };

    let generation = deployment.metadata.generation.unwrap_or_default();
    if status.observed_generation.unwrap_or_default() < generation {
        return false;
    }

    let desired = spec.replicas.unwrap_or(1);
    let updated = status.updated_replicas.unwrap_or_default();
    let available = status.available_replicas.unwrap_or_default();
    let total = status.replicas.unwrap_or_default();

    updated >= desired && available >= desired && total <= updated
}

/// Lists the namespaces that have pods scheduled on `node`, sorted and without repeats.
pub async fn node_namespaces(
    client: &dyn ClusterClient,
    node: &str,
) -> Result<Vec<String>, WorkloadError> {
    let request = DownstreamRequest::get("/api/v1/pods")
        .with_query("fieldSelector", format!("spec.nodeName={node}"));
    let pods: List<Pod> = fetch(client, request).await?;

    let namespaces: BTreeSet<String> = pods
        .items
        .into_iter()
        .filter_map(|pod| pod.metadata.namespace)
        .collect();

    Ok(namespaces.into_iter().collect())
}

/// Lists the pods owned by a deployment through its replica sets.
pub async fn deployment_pods(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
) -> Result<List<Pod>, WorkloadError> {
    let deployment: Deployment =
        fetch(client, DownstreamRequest::get(deployment_path(namespace, name))).await?;

    let Some(spec) = &deployment.spec else {
        return Ok(empty_list());
    };
    let Some(deployment_uid) = deployment.metadata.uid.as_deref() else {
        return Ok(empty_list());
    };
    if spec.replicas == Some(0) {
        return Ok(empty_list());
    }

    let selector = selector_query(&spec.selector)?;
    let replica_sets = DownstreamRequest::get(format!(
        "/apis/apps/v1/namespaces/{namespace}/replicasets"
    ))
    .with_query("labelSelector", selector.clone());
    let pods = DownstreamRequest::get(format!("/api/v1/namespaces/{namespace}/pods"))
        .with_query("labelSelector", selector);

    let (replica_sets, pods) = tokio::try_join!(
        fetch::<List<ReplicaSet>>(client, replica_sets),
        fetch::<List<Pod>>(client, pods),
    )?;

    let owned_sets: HashSet<&str> = replica_sets
        .items
        .iter()
        .filter(|replica_set| controller_uid(&replica_set.metadata) == Some(deployment_uid))
        .filter_map(|replica_set| replica_set.metadata.uid.as_deref())
        .collect();

    let items = pods
        .items
        .into_iter()
        .filter(|pod| controller_uid(&pod.metadata).is_some_and(|uid| owned_sets.contains(uid)))
        .collect();

    Ok(List {
        items,
        metadata: ListMeta::default(),
    })
}

/// Triggers a rollout of a deployment and waits until it is ready.
pub async fn restart_deployment(
    client: &dyn ClusterClient,
    namespace: &str,
    name: &str,
    wait: RestartWait,
) -> Result<(), WorkloadError> {
    let path = deployment_path(namespace, name);
    let before: Deployment = fetch(client, DownstreamRequest::get(path.clone())).await?;

    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .to_string();
    let labels = BTreeMap::from([(RESTART_LABEL, stamp)]);
    let patch = serde_json::json!({ "spec": { "template": { "metadata": { "labels": labels } } } });

    let mut request = DownstreamRequest::get(path.clone());
    request.method = Method::PATCH;
    request
        .headers
        .insert(CONTENT_TYPE, HeaderValue::from_static(STRATEGIC_MERGE_PATCH));
    request.body = Bytes::from(serde_json::to_vec(&patch)?);

    let patched: Deployment = fetch(client, request).await?;
    if patched.metadata.resource_version == before.metadata.resource_version {
        return Err(WorkloadError::RestartNotApplied {
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
    }
    info!(namespace, name, "restarting deployment");

    let deadline = Instant::now() + wait.timeout;
    loop {
        let current: Deployment = fetch(client, DownstreamRequest::get(path.clone())).await?;
        if deployment_is_ready(&current) {
            info!(namespace, name, "deployment restarted");
            return Ok(());
        }

        if Instant::now() + wait.poll_interval > deadline {
            return Err(WorkloadError::RestartTimedOut {
                namespace: namespace.to_string(),
                name: name.to_string(),
                timeout: wait.timeout,
            });
        }

        debug!(namespace, name, "waiting for deployment rollout");
        tokio::time::sleep(wait.poll_interval).await;
    }
}

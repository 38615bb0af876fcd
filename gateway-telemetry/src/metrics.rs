use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Number of registry rebuilds, labelled by `outcome` (`success` or `failure`).
pub const REGISTRY_REBUILDS_TOTAL: &str = "gateway_registry_rebuilds_total";
/// Number of clusters in the currently published registry snapshot.
pub const REGISTRY_CLUSTERS: &str = "gateway_registry_clusters";
/// Number of retries scheduled by the store watcher, labelled by `kind` (`watch` or `sync`).
pub const WATCHER_RETRIES_TOTAL: &str = "gateway_watcher_retries_total";
/// Number of proxied requests, labelled by `status` class.
pub const PROXY_REQUESTS_TOTAL: &str = "gateway_proxy_requests_total";
/// Latency of proxied requests.
pub const PROXY_REQUEST_DURATION_SECONDS: &str = "gateway_proxy_request_duration_seconds";

/// Interval between upkeep runs on the recorder.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

// A mutex instead of a `OnceLock` because installing the recorder is fallible and only
// one global recorder may exist. Tests call this repeatedly.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the global Prometheus recorder and returns a handle used to render the
/// `/metrics` endpoint.
///
/// Installation happens once; later calls return clones of the same handle. Must be
/// called from within a Tokio runtime since it spawns the upkeep task.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut prometheus_handle = PROMETHEUS_HANDLE
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(handle) = &*prometheus_handle {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *prometheus_handle = Some(handle.clone());

    describe_metrics();

    let upkeep_handle = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            upkeep_handle.run_upkeep();
        }
    });

    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(
        REGISTRY_REBUILDS_TOTAL,
        Unit::Count,
        "Registry rebuilds triggered by credential store changes"
    );
    describe_gauge!(
        REGISTRY_CLUSTERS,
        Unit::Count,
        "Clusters in the published registry snapshot"
    );
    describe_counter!(
        WATCHER_RETRIES_TOTAL,
        Unit::Count,
        "Retries scheduled by the credential store watcher"
    );
    describe_counter!(
        PROXY_REQUESTS_TOTAL,
        Unit::Count,
        "Requests forwarded to downstream clusters"
    );
    describe_histogram!(
        PROXY_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Time spent forwarding a request to a downstream cluster"
    );
}

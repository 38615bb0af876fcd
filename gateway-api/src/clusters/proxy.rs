use bytes::Bytes;
use gateway_telemetry::metrics::{PROXY_REQUEST_DURATION_SECONDS, PROXY_REQUESTS_TOTAL};
use http::{HeaderMap, Method};
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

use crate::clusters::client::{ClusterClientError, DownstreamRequest, DownstreamResponse};
use crate::clusters::registry::ClusterRegistry;

/// Headers scoped to a single connection. Dropped in both directions.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Request headers that carry the caller's own credentials or describe the inbound
/// request and are therefore not forwarded.
const CALLER_HEADERS: &[&str] = &["authorization", "content-length", "host"];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("The cluster {0} was not found")]
    ClusterNotFound(String),

    #[error(transparent)]
    Downstream(#[from] ClusterClientError),
}

/// An inbound request to relay to a downstream cluster.
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    pub method: Method,
    /// Downstream API path, with the routing prefix already removed.
    pub path: String,
    /// Query parameters as received. Keys may repeat.
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Merges repeated query keys into one comma-joined value, keeping first-seen key order.
pub fn join_query_values(query: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut joined: Vec<(String, String)> = Vec::with_capacity(query.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(query.len());

    for (key, value) in query {
        match positions.get(&key) {
            Some(&position) => {
                let existing = &mut joined[position].1;
                existing.push(',');
                existing.push_str(&value);
            }
            None => {
                positions.insert(key.clone(), joined.len());
                joined.push((key, value));
            }
        }
    }

    joined
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by `Connection` are hop-by-hop as well.
    let listed: Vec<String> = headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in HOP_BY_HOP_HEADERS.iter().copied().chain(listed.iter().map(String::as_str)) {
        headers.remove(name);
    }
}

fn forwarded_headers(mut headers: HeaderMap) -> HeaderMap {
    strip_hop_by_hop(&mut headers);
    for name in CALLER_HEADERS {
        headers.remove(*name);
    }

    headers
}

/// End-to-end headers of a downstream response, such as `Content-Type` and
/// `Content-Encoding`, to be returned to the caller with the body bytes untouched.
/// The length is left to the server writing the relayed body.
pub fn relayed_headers(mut headers: HeaderMap) -> HeaderMap {
    strip_hop_by_hop(&mut headers);
    headers.remove(http::header::CONTENT_LENGTH);

    headers
}

fn status_class(result: &Result<DownstreamResponse, ClusterClientError>) -> &'static str {
    match result {
        Ok(response) if response.status.is_success() => "2xx",
        Ok(response) if response.status.is_redirection() => "3xx",
        Ok(response) if response.status.is_client_error() => "4xx",
        Ok(_) => "5xx",
        Err(_) => "error",
    }
}

/// Relays requests to the live cluster selected by code.
pub struct RequestProxy {
    registry: Arc<ClusterRegistry>,
}

impl RequestProxy {
    pub fn new(registry: Arc<ClusterRegistry>) -> RequestProxy {
        RequestProxy { registry }
    }

    /// Forwards `request` to the cluster `code` and returns the downstream answer with its
    /// end-to-end headers, error statuses included.
    pub async fn forward(
        &self,
        code: &str,
        request: ForwardRequest,
    ) -> Result<DownstreamResponse, ForwardError> {
        let entry = self
            .registry
            .lookup_by_code(code)
            .ok_or_else(|| ForwardError::ClusterNotFound(code.to_string()))?;

        let path = if request.path.starts_with('/') {
            request.path
        } else {
            format!("/{}", request.path)
        };
        let downstream = DownstreamRequest {
            method: request.method,
            path,
            query: join_query_values(request.query),
            headers: forwarded_headers(request.headers),
            body: request.body,
        };
        debug!(code, method = %downstream.method, path = %downstream.path, "forwarding request");

        let started = Instant::now();
        let result = entry.client.execute(downstream).await;

        counter!(PROXY_REQUESTS_TOTAL, "status" => status_class(&result)).increment(1);
        histogram!(PROXY_REQUEST_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        let mut response = result?;
        response.headers = relayed_headers(response.headers);

        Ok(response)
    }
}

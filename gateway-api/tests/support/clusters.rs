use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use gateway_api::clusters::client::{
    ClusterClient, ClusterClientError, ClusterClientFactory, DownstreamRequest,
    DownstreamResponse,
};
use http::{HeaderMap, HeaderValue, StatusCode};

/// Credentials accepted by [`MockClusterFactory`]: the text before the first `;` is the
/// identity of the cluster, the rest only distinguishes credential versions.
pub fn credentials(identity: &str, version: &str) -> Vec<u8> {
    format!("{identity};{version}").into_bytes()
}

/// Builds [`MockClusterClient`]s from text credentials. Credentials starting with
/// `invalid` are rejected.
#[derive(Default)]
pub struct MockClusterFactory {
    built: AtomicUsize,
}

impl MockClusterFactory {
    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterClientFactory for MockClusterFactory {
    async fn build(&self, credentials: &[u8]) -> Result<Arc<dyn ClusterClient>, ClusterClientError> {
        let text = std::str::from_utf8(credentials)
            .map_err(|err| ClusterClientError::InvalidCredentials(err.to_string()))?;
        if text.starts_with("invalid") {
            return Err(ClusterClientError::InvalidCredentials(
                "not a kubeconfig".to_string(),
            ));
        }

        self.built.fetch_add(1, Ordering::SeqCst);
        let identity = text.split(';').next().unwrap_or_default().to_string();

        Ok(Arc::new(MockClusterClient { identity }))
    }
}

/// Downstream cluster that answers namespace lookups with its identity, turns
/// `/status/{code}` into that status, answers `/encoded/{encoding}` with an opaque body in
/// that content encoding and echoes every other request as JSON.
pub struct MockClusterClient {
    identity: String,
}

fn json_response(status: StatusCode, body: serde_json::Value) -> DownstreamResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );

    DownstreamResponse {
        status,
        headers,
        body: Bytes::from(serde_json::to_vec(&body).unwrap()),
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn execute(
        &self,
        request: DownstreamRequest,
    ) -> Result<DownstreamResponse, ClusterClientError> {
        if let Some(namespace) = request.path.strip_prefix("/api/v1/namespaces/")
            && !namespace.contains('/')
        {
            return Ok(json_response(
                StatusCode::OK,
                serde_json::json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": { "name": namespace, "uid": self.identity }
                }),
            ));
        }

        if let Some(code) = request.path.strip_prefix("/status/") {
            let status = code
                .parse::<u16>()
                .ok()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::BAD_REQUEST);
            return Ok(json_response(
                status,
                serde_json::json!({
                    "apiVersion": "v1",
                    "kind": "Status",
                    "status": "Failure",
                    "code": status.as_u16()
                }),
            ));
        }

        if let Some(encoding) = request.path.strip_prefix("/encoded/") {
            let mut headers = HeaderMap::new();
            headers.insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            headers.insert(
                http::header::CONTENT_ENCODING,
                HeaderValue::from_str(encoding).unwrap(),
            );
            headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("4"));
            return Ok(DownstreamResponse {
                status: StatusCode::OK,
                headers,
                body: Bytes::from_static(&[0x1f, 0x8b, 0x08, 0x00]),
            });
        }

        let headers: Vec<&str> = request.headers.keys().map(|name| name.as_str()).collect();
        Ok(json_response(
            StatusCode::OK,
            serde_json::json!({
                "identity": self.identity,
                "method": request.method.as_str(),
                "path": request.path,
                "query": request.query,
                "headers": headers,
                "body": String::from_utf8_lossy(&request.body),
            }),
        ))
    }
}

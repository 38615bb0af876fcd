use async_trait::async_trait;
use gateway_config::shared::DownstreamConfig;
use http_body_util::BodyExt;
use kube::Client;
use kube::client::Body;
use kube::config::{KubeConfigOptions, Kubeconfig};
use percent_encoding::{AsciiSet, CONTROLS, NON_ALPHANUMERIC, utf8_percent_encode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::clusters::client::{
    ClusterClient, ClusterClientError, ClusterClientFactory, DownstreamRequest,
    DownstreamResponse,
};

/// Characters escaped in query keys and values. Commas stay readable since list-valued
/// parameters are comma joined.
const QUERY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b',');

/// Characters escaped in the request path.
const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Builds the request target from an API path and query parameters. Parameters with an
/// empty value are written as bare flags, such as `?pretty`.
pub(crate) fn build_target(path: &str, query: &[(String, String)]) -> String {
    let mut target = String::with_capacity(path.len() + 1);
    if !path.starts_with('/') {
        target.push('/');
    }
    target.extend(utf8_percent_encode(path, PATH_ENCODE_SET));

    for (index, (key, value)) in query.iter().enumerate() {
        target.push(if index == 0 { '?' } else { '&' });
        target.extend(utf8_percent_encode(key, QUERY_ENCODE_SET));
        if !value.is_empty() {
            target.push('=');
            target.extend(utf8_percent_encode(value, QUERY_ENCODE_SET));
        }
    }

    target
}

/// [`ClusterClient`] backed by a [`kube::Client`].
///
/// Requests beyond `max_concurrent_requests` wait for a free slot, and each request is
/// bounded by the configured timeout, waiting time included.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl KubeClusterClient {
    pub fn new(client: Client, config: &DownstreamConfig) -> KubeClusterClient {
        KubeClusterClient {
            client,
            permits: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            timeout: config.request_timeout(),
        }
    }

    async fn send(
        &self,
        request: http::Request<Body>,
    ) -> Result<DownstreamResponse, ClusterClientError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ClusterClientError::Closed)?;

        let response = self.client.send(request).await?;
        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|err| ClusterClientError::Body(err.to_string()))?
            .to_bytes();

        Ok(DownstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn execute(
        &self,
        request: DownstreamRequest,
    ) -> Result<DownstreamResponse, ClusterClientError> {
        let target = build_target(&request.path, &request.query);

        let mut builder = http::Request::builder()
            .method(request.method)
            .uri(target);
        if let Some(headers) = builder.headers_mut() {
            headers.extend(request.headers);
        }
        let http_request = builder
            .body(Body::from(request.body.to_vec()))
            .map_err(|err| ClusterClientError::InvalidRequest(err.to_string()))?;

        tokio::time::timeout(self.timeout, self.send(http_request))
            .await
            .map_err(|_| ClusterClientError::Timeout(self.timeout))?
    }
}

/// Builds [`KubeClusterClient`]s from kubeconfig documents.
#[derive(Debug, Clone)]
pub struct KubeClusterClientFactory {
    config: DownstreamConfig,
}

impl KubeClusterClientFactory {
    pub fn new(config: DownstreamConfig) -> KubeClusterClientFactory {
        KubeClusterClientFactory { config }
    }
}

#[async_trait]
impl ClusterClientFactory for KubeClusterClientFactory {
    async fn build(&self, credentials: &[u8]) -> Result<Arc<dyn ClusterClient>, ClusterClientError> {
        let kubeconfig = std::str::from_utf8(credentials)
            .map_err(|err| ClusterClientError::InvalidCredentials(err.to_string()))?;
        let kubeconfig = Kubeconfig::from_yaml(kubeconfig)
            .map_err(|err| ClusterClientError::InvalidCredentials(err.to_string()))?;

        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|err| ClusterClientError::InvalidCredentials(err.to_string()))?;
        let client = Client::try_from(config)
            .map_err(|err| ClusterClientError::InvalidCredentials(err.to_string()))?;

        Ok(Arc::new(KubeClusterClient::new(client, &self.config)))
    }
}

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use gateway_api::clusters::identity::SystemNamespaceIdentity;
use gateway_api::config::ApiConfig;
use gateway_api::startup::run;
use gateway_config::{Environment, load_config};
use gateway_telemetry::metrics::init_metrics_handle;
use reqwest::{IntoUrl, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;

use crate::support::clusters::MockClusterFactory;
use crate::support::k8s_client::MockK8sClient;

/// How long tests wait for the registry to catch up with the store.
const SYNC_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestApp {
    pub address: String,
    pub api_client: reqwest::Client,
    pub k8s_client: Arc<MockK8sClient>,
    pub factory: Arc<MockClusterFactory>,
    username: String,
    password: String,
    server_handle: tokio::task::JoinHandle<std::io::Result<()>>,
}

impl TestApp {
    fn authenticated(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.password))
    }

    pub fn get_authenticated<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.authenticated(self.api_client.get(url))
    }

    pub fn post_authenticated<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.authenticated(self.api_client.post(url))
    }

    fn put_authenticated<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.authenticated(self.api_client.put(url))
    }

    fn patch_authenticated<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.authenticated(self.api_client.patch(url))
    }

    fn delete_authenticated<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.authenticated(self.api_client.delete(url))
    }

    pub async fn create_cluster(&self, code: &str, credentials: Vec<u8>) -> reqwest::Response {
        self.post_authenticated(format!("{}/apis/cluster/v1/code/{code}", &self.address))
            .body(credentials)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn update_cluster(&self, code: &str, credentials: Vec<u8>) -> reqwest::Response {
        self.put_authenticated(format!("{}/apis/cluster/v1/code/{code}", &self.address))
            .body(credentials)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn apply_cluster(&self, code: &str, credentials: Vec<u8>) -> reqwest::Response {
        self.patch_authenticated(format!("{}/apis/cluster/v1/code/{code}", &self.address))
            .body(credentials)
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn read_cluster(&self, code: &str) -> reqwest::Response {
        self.get_authenticated(format!("{}/apis/cluster/v1/code/{code}", &self.address))
            .send()
            .await
            .expect("failed to execute request")
    }

    pub async fn delete_cluster(&self, code: &str) -> reqwest::Response {
        self.delete_authenticated(format!("{}/apis/cluster/v1/code/{code}", &self.address))
            .send()
            .await
            .expect("Failed to execute request.")
    }

    pub async fn read_all_clusters(&self) -> reqwest::Response {
        self.get_authenticated(format!("{}/apis/cluster/v1/", &self.address))
            .send()
            .await
            .expect("failed to execute request")
    }

    pub fn proxy_url(&self, code: &str, path: &str) -> String {
        format!("{}/apis/server/v1/proxy/cluster/{code}/{path}", &self.address)
    }

    /// Waits until reading `code` answers with `status`, i.e. until the registry caught
    /// up with the last write.
    pub async fn wait_for_cluster_status(&self, code: &str, status: StatusCode) {
        let deadline = tokio::time::Instant::now() + SYNC_TIMEOUT;
        loop {
            if self.read_cluster(code).await.status() == status {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "cluster {code} never reached status {status}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn wait_until_live(&self, code: &str) {
        self.wait_for_cluster_status(code, StatusCode::OK).await;
    }

    pub async fn wait_until_gone(&self, code: &str) {
        self.wait_for_cluster_status(code, StatusCode::NOT_FOUND).await;
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

pub async fn spawn_test_app() -> TestApp {
    spawn_test_app_with_store(MockK8sClient::new()).await
}

pub async fn spawn_test_app_with_store(k8s_client: MockK8sClient) -> TestApp {
    // We set the environment to dev.
    Environment::Dev.set();

    let base_address = "127.0.0.1";
    let listener =
        TcpListener::bind(format!("{base_address}:0")).expect("failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    let mut config = load_config::<ApiConfig>().expect("Failed to read configuration");
    config.control_plane.poll_interval_ms = 20;
    config.watcher_retry.initial_delay_ms = 10;
    config.watcher_retry.max_delay_ms = 100;

    let username = config.basic_auth.username.clone();
    let password = config.basic_auth.password.expose_secret().to_string();

    let k8s_client = Arc::new(k8s_client);
    let factory = Arc::new(MockClusterFactory::default());
    let discovery = Arc::new(SystemNamespaceIdentity::new(
        config.downstream.identity_namespace.clone(),
    ));
    let metrics_handle = init_metrics_handle().expect("failed to install metrics recorder");

    let application = run(
        config,
        listener,
        k8s_client.clone(),
        factory.clone(),
        discovery,
        metrics_handle,
    )
    .await
    .expect("failed to bind address");

    let server_handle = tokio::spawn(application.run_until_stopped());

    TestApp {
        address: format!("http://{base_address}:{port}"),
        api_client: reqwest::Client::new(),
        k8s_client,
        factory,
        username,
        password,
        server_handle,
    }
}

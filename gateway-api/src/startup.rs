use std::{net::TcpListener, path::PathBuf, sync::Arc};

use actix_web::{App, HttpServer, dev::Server, web};
use actix_web_httpauth::middleware::HttpAuthentication;
use gateway_telemetry::metrics::init_metrics_handle;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    authentication::auth_validator,
    clusters::{
        admin::ClusterAdmin,
        client::{ClusterClientFactory, ClusterConnector},
        identity::{IdentityDiscovery, SystemNamespaceIdentity},
        info::ClusterInfo,
        kube_client::KubeClusterClientFactory,
        proxy::RequestProxy,
        registry::ClusterRegistry,
        watcher::{ControlPlaneWatcher, WatcherHandle, WatcherSettings},
    },
    config::ApiConfig,
    k8s::{K8sClient, http::HttpK8sClient},
    routes::{
        ErrorMessage,
        clusters::{
            apply_cluster, create_cluster, delete_cluster, read_all_clusters, read_cluster,
            update_cluster,
        },
        health_check::health_check,
        metrics::metrics,
        proxy::proxy_request,
        workloads::{read_deployment_pods, read_node_namespaces, restart_deployment},
    },
    span_builder::ApiRootSpanBuilder,
};

/// Upper bound on request bodies, large enough for manifests sent through the proxy.
const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

pub struct Application {
    port: u16,
    server: Server,
    watcher: WatcherHandle,
}

impl Application {
    pub async fn build(config: ApiConfig) -> Result<Self, anyhow::Error> {
        let address = format!("{}:{}", config.application.host, config.application.port);
        let listener = TcpListener::bind(address)?;

        let k8s_client = Arc::new(HttpK8sClient::new(&config.control_plane).await?);
        let factory = Arc::new(KubeClusterClientFactory::new(config.downstream.clone()));
        let discovery = Arc::new(SystemNamespaceIdentity::new(
            config.downstream.identity_namespace.clone(),
        ));
        let metrics_handle = init_metrics_handle()?;

        run(
            config,
            listener,
            k8s_client,
            factory,
            discovery,
            metrics_handle,
        )
        .await
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves until the server stops, then stops the store watcher.
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        let result = self.server.await;

        self.watcher.shutdown();
        if let Err(err) = self.watcher.wait().await {
            error!(error = %err, "store watcher did not stop cleanly");
        }
        info!("gateway stopped");

        result
    }
}

pub async fn run(
    config: ApiConfig,
    listener: TcpListener,
    k8s_client: Arc<dyn K8sClient>,
    factory: Arc<dyn ClusterClientFactory>,
    discovery: Arc<dyn IdentityDiscovery>,
    metrics_handle: PrometheusHandle,
) -> Result<Application, anyhow::Error> {
    let port = listener.local_addr()?.port();
    let seed_path = config.control_plane.seed_path.as_ref().map(PathBuf::from);

    let registry = Arc::new(ClusterRegistry::new());
    let connector = ClusterConnector::new(factory, discovery);

    let watcher = ControlPlaneWatcher::new(
        k8s_client.clone(),
        registry.clone(),
        connector.clone(),
        WatcherSettings {
            poll_interval: config.control_plane.poll_interval(),
            retry: config.watcher_retry.clone(),
            seed_path: seed_path.clone(),
        },
    )
    .start();

    let admin = web::Data::new(ClusterAdmin::new(
        k8s_client,
        registry.clone(),
        connector,
        seed_path,
        config.control_plane.max_write_attempts,
    ));
    let proxy = web::Data::new(RequestProxy::new(registry.clone()));
    let registry = web::Data::from(registry);
    let config = web::Data::new(config);

    #[derive(OpenApi)]
    #[openapi(
        paths(
            crate::routes::health_check::health_check,
            crate::routes::metrics::metrics,
            crate::routes::clusters::create_cluster,
            crate::routes::clusters::update_cluster,
            crate::routes::clusters::apply_cluster,
            crate::routes::clusters::read_cluster,
            crate::routes::clusters::delete_cluster,
            crate::routes::clusters::read_all_clusters,
            crate::routes::proxy::proxy_request,
            crate::routes::workloads::read_node_namespaces,
            crate::routes::workloads::read_deployment_pods,
            crate::routes::workloads::restart_deployment,
        ),
        components(schemas(ClusterInfo, ErrorMessage))
    )]
    struct ApiDoc;

    let openapi = ApiDoc::openapi();

    let server = HttpServer::new(move || {
        let tracing_logger = TracingLogger::<ApiRootSpanBuilder>::new();
        App::new()
            .wrap(
                sentry::integrations::actix::Sentry::builder()
                    .capture_server_errors(true)
                    .start_transaction(true)
                    .finish(),
            )
            .wrap(tracing_logger)
            .service(health_check)
            .service(metrics)
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", openapi.clone()),
            )
            .service(
                web::scope("/apis/cluster/v1")
                    .wrap(HttpAuthentication::basic(auth_validator))
                    .service(create_cluster)
                    .service(update_cluster)
                    .service(apply_cluster)
                    .service(read_cluster)
                    .service(delete_cluster)
                    .service(read_all_clusters),
            )
            .service(
                web::scope("/apis/server/v1")
                    .wrap(HttpAuthentication::basic(auth_validator))
                    .service(
                        web::resource("/proxy/cluster/{code}/{path:.*}").to(proxy_request),
                    )
                    .service(read_node_namespaces)
                    .service(read_deployment_pods)
                    .service(restart_deployment),
            )
            .app_data(web::PayloadConfig::new(MAX_PAYLOAD_BYTES))
            .app_data(web::ThinData(metrics_handle.clone()))
            .app_data(config.clone())
            .app_data(admin.clone())
            .app_data(proxy.clone())
            .app_data(registry.clone())
    })
    .listen(listener)?
    .run();

    Ok(Application {
        port,
        server,
        watcher,
    })
}

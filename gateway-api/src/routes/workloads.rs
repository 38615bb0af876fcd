use actix_web::{
    HttpResponse, Responder, ResponseError, get,
    http::StatusCode,
    post,
    web::{Data, Json, Path},
};
use std::sync::Arc;
use thiserror::Error;
use tracing_actix_web::RootSpan;

use crate::clusters::client::ClusterClient;
use crate::clusters::registry::ClusterRegistry;
use crate::routes::{ErrorMessage, downstream_error_response, downstream_status, error_response};
use crate::workloads::{self, RestartWait, WorkloadError};

#[derive(Debug, Error)]
pub enum WorkloadsError {
    #[error("The cluster {0} was not found")]
    ClusterNotFound(String),

    #[error(transparent)]
    Workload(#[from] WorkloadError),
}

impl ResponseError for WorkloadsError {
    fn status_code(&self) -> StatusCode {
        match self {
            WorkloadsError::ClusterNotFound(_) => StatusCode::NOT_FOUND,
            WorkloadsError::Workload(WorkloadError::Downstream(err)) => downstream_status(err),
            WorkloadsError::Workload(WorkloadError::Decode(_)) => StatusCode::BAD_GATEWAY,
            WorkloadsError::Workload(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            WorkloadsError::Workload(WorkloadError::Downstream(err)) => {
                downstream_error_response(err)
            }
            e => error_response(e.status_code(), e.to_string()),
        }
    }
}

fn cluster_client(
    registry: &ClusterRegistry,
    code: &str,
) -> Result<Arc<dyn ClusterClient>, WorkloadsError> {
    registry
        .lookup_by_code(code)
        .map(|entry| entry.client.clone())
        .ok_or_else(|| WorkloadsError::ClusterNotFound(code.to_string()))
}

#[utoipa::path(
    context_path = "/apis/server/v1",
    params(
        ("code" = String, Path, description = "Code of the cluster"),
        ("node" = String, Path, description = "Name of the node"),
    ),
    responses(
        (status = 200, description = "Namespaces with pods scheduled on the node", body = Vec<String>),
        (status = 404, description = "Cluster not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Workloads"
)]
#[get("/cluster/{code}/node/{node}/namespace")]
pub async fn read_node_namespaces(
    registry: Data<ClusterRegistry>,
    route: Path<(String, String)>,
    root_span: RootSpan,
) -> Result<impl Responder, WorkloadsError> {
    let (code, node) = route.into_inner();

    root_span.record("cluster_code", &code);

    let client = cluster_client(&registry, &code)?;
    let namespaces = workloads::node_namespaces(client.as_ref(), &node).await?;

    Ok(Json(namespaces))
}

#[utoipa::path(
    context_path = "/apis/server/v1",
    params(
        ("code" = String, Path, description = "Code of the cluster"),
        ("namespace" = String, Path, description = "Namespace of the deployment"),
        ("name" = String, Path, description = "Name of the deployment"),
    ),
    responses(
        (status = 200, description = "Pod list of the pods owned by the deployment"),
        (status = 404, description = "Cluster or deployment not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Workloads"
)]
#[get("/cluster/{code}/namespace/{namespace}/deployments/{name}/pods")]
pub async fn read_deployment_pods(
    registry: Data<ClusterRegistry>,
    route: Path<(String, String, String)>,
    root_span: RootSpan,
) -> Result<impl Responder, WorkloadsError> {
    let (code, namespace, name) = route.into_inner();

    root_span.record("cluster_code", &code);

    let client = cluster_client(&registry, &code)?;
    let pods = workloads::deployment_pods(client.as_ref(), &namespace, &name).await?;

    Ok(Json(pods))
}

#[utoipa::path(
    context_path = "/apis/server/v1",
    params(
        ("code" = String, Path, description = "Code of the cluster"),
        ("namespace" = String, Path, description = "Namespace of the deployment"),
        ("name" = String, Path, description = "Name of the deployment"),
    ),
    responses(
        (status = 200, description = "Deployment restarted and ready"),
        (status = 404, description = "Cluster or deployment not found", body = ErrorMessage),
        (status = 500, description = "Restart did not complete", body = ErrorMessage),
    ),
    tag = "Workloads"
)]
#[post("/cluster/{code}/namespace/{namespace}/deployments/{name}/restart")]
pub async fn restart_deployment(
    registry: Data<ClusterRegistry>,
    route: Path<(String, String, String)>,
    root_span: RootSpan,
) -> Result<impl Responder, WorkloadsError> {
    let (code, namespace, name) = route.into_inner();

    root_span.record("cluster_code", &code);

    let client = cluster_client(&registry, &code)?;
    workloads::restart_deployment(client.as_ref(), &namespace, &name, RestartWait::default())
        .await?;

    Ok(HttpResponse::Ok().finish())
}

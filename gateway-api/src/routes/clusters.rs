use actix_web::{
    HttpResponse, Responder, ResponseError, delete, get,
    http::StatusCode,
    patch, post, put,
    web::{Bytes, Data, Json, Path},
};
use thiserror::Error;
use tracing_actix_web::RootSpan;

use crate::clusters::admin::{ClusterAdmin, ClusterAdminError};
use crate::clusters::info::ClusterInfo;
use crate::routes::{ErrorMessage, downstream_error_response, downstream_status, error_response};

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("The request body must contain the cluster credentials")]
    EmptyCredentials,

    #[error(transparent)]
    Admin(#[from] ClusterAdminError),
}

impl ClusterError {
    pub fn to_message(&self) -> String {
        match self {
            // Store and record internals stay in the logs.
            ClusterError::Admin(
                ClusterAdminError::Store(_)
                | ClusterAdminError::CorruptRecord { .. }
                | ClusterAdminError::Encode(_),
            ) => "internal server error".to_string(),
            e => e.to_string(),
        }
    }
}

impl ResponseError for ClusterError {
    fn status_code(&self) -> StatusCode {
        match self {
            ClusterError::EmptyCredentials => StatusCode::BAD_REQUEST,
            ClusterError::Admin(err) => match err {
                ClusterAdminError::CodeExists(_) | ClusterAdminError::IdentityInUse(_) => {
                    StatusCode::CONFLICT
                }
                ClusterAdminError::ClusterNotFound(_) => StatusCode::NOT_FOUND,
                ClusterAdminError::Downstream(err) => downstream_status(err),
                ClusterAdminError::StoreContention(_) => StatusCode::SERVICE_UNAVAILABLE,
                ClusterAdminError::CorruptRecord { .. }
                | ClusterAdminError::Encode(_)
                | ClusterAdminError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ClusterError::Admin(ClusterAdminError::Downstream(err)) => {
                downstream_error_response(err)
            }
            e => error_response(e.status_code(), e.to_message()),
        }
    }
}

fn credentials(body: &Bytes) -> Result<&[u8], ClusterError> {
    if body.is_empty() {
        return Err(ClusterError::EmptyCredentials);
    }

    Ok(body.as_ref())
}

#[utoipa::path(
    context_path = "/apis/cluster/v1",
    request_body(content = String, content_type = "application/octet-stream", description = "Kubeconfig of the cluster"),
    params(
        ("code" = String, Path, description = "Code of the cluster"),
    ),
    responses(
        (status = 200, description = "Register a new cluster"),
        (status = 400, description = "Bad request", body = ErrorMessage),
        (status = 409, description = "Code or cluster already registered", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Clusters"
)]
#[post("/code/{code}")]
pub async fn create_cluster(
    admin: Data<ClusterAdmin>,
    code: Path<String>,
    body: Bytes,
    root_span: RootSpan,
) -> Result<impl Responder, ClusterError> {
    let code = code.into_inner();

    root_span.record("cluster_code", &code);

    admin.create(&code, credentials(&body)?).await?;

    Ok(HttpResponse::Ok().finish())
}

#[utoipa::path(
    context_path = "/apis/cluster/v1",
    request_body(content = String, content_type = "application/octet-stream", description = "Kubeconfig of the cluster"),
    params(
        ("code" = String, Path, description = "Code of the cluster"),
    ),
    responses(
        (status = 200, description = "Replace the credentials of cluster with code = code"),
        (status = 400, description = "Bad request", body = ErrorMessage),
        (status = 404, description = "Cluster not found", body = ErrorMessage),
        (status = 409, description = "Cluster registered under another code", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Clusters"
)]
#[put("/code/{code}")]
pub async fn update_cluster(
    admin: Data<ClusterAdmin>,
    code: Path<String>,
    body: Bytes,
    root_span: RootSpan,
) -> Result<impl Responder, ClusterError> {
    let code = code.into_inner();

    root_span.record("cluster_code", &code);

    admin.update(&code, credentials(&body)?).await?;

    Ok(HttpResponse::Ok().finish())
}

#[utoipa::path(
    context_path = "/apis/cluster/v1",
    request_body(content = String, content_type = "application/octet-stream", description = "Kubeconfig of the cluster"),
    params(
        ("code" = String, Path, description = "Code of the cluster"),
    ),
    responses(
        (status = 200, description = "Register cluster with code = code or replace its credentials"),
        (status = 400, description = "Bad request", body = ErrorMessage),
        (status = 409, description = "Cluster registered under another code", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Clusters"
)]
#[patch("/code/{code}")]
pub async fn apply_cluster(
    admin: Data<ClusterAdmin>,
    code: Path<String>,
    body: Bytes,
    root_span: RootSpan,
) -> Result<impl Responder, ClusterError> {
    let code = code.into_inner();

    root_span.record("cluster_code", &code);

    admin.apply(&code, credentials(&body)?).await?;

    Ok(HttpResponse::Ok().finish())
}

#[utoipa::path(
    context_path = "/apis/cluster/v1",
    params(
        ("code" = String, Path, description = "Code of the cluster"),
    ),
    responses(
        (status = 200, description = "Return cluster with code = code", body = ClusterInfo),
        (status = 404, description = "Cluster not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Clusters"
)]
#[get("/code/{code}")]
pub async fn read_cluster(
    admin: Data<ClusterAdmin>,
    code: Path<String>,
    root_span: RootSpan,
) -> Result<impl Responder, ClusterError> {
    let code = code.into_inner();

    root_span.record("cluster_code", &code);

    let cluster = admin.read(&code).await?;

    Ok(Json(cluster))
}

#[utoipa::path(
    context_path = "/apis/cluster/v1",
    params(
        ("code" = String, Path, description = "Code of the cluster"),
    ),
    responses(
        (status = 200, description = "Delete cluster with code = code"),
        (status = 404, description = "Cluster not found", body = ErrorMessage),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Clusters"
)]
#[delete("/code/{code}")]
pub async fn delete_cluster(
    admin: Data<ClusterAdmin>,
    code: Path<String>,
    root_span: RootSpan,
) -> Result<impl Responder, ClusterError> {
    let code = code.into_inner();

    root_span.record("cluster_code", &code);

    admin.delete(&code).await?;

    Ok(HttpResponse::Ok().finish())
}

#[utoipa::path(
    context_path = "/apis/cluster/v1",
    responses(
        (status = 200, description = "Return all stored clusters", body = Vec<ClusterInfo>),
        (status = 500, description = "Internal server error", body = ErrorMessage),
    ),
    tag = "Clusters"
)]
#[get("/")]
pub async fn read_all_clusters(admin: Data<ClusterAdmin>) -> Result<impl Responder, ClusterError> {
    let clusters = admin.list().await?;

    Ok(Json(clusters))
}

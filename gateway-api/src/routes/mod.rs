use actix_web::HttpResponse;
use actix_web::http::StatusCode;
use actix_web::http::header::ContentType;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::clusters::client::ClusterClientError;

pub mod clusters;
pub mod health_check;
pub mod metrics;
pub mod proxy;
pub mod workloads;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorMessage {
    #[schema(example = "an error occurred in the api")]
    pub error: String,
}

/// Renders `message` as a JSON [`ErrorMessage`] with the given status.
pub(crate) fn error_response(status: StatusCode, message: String) -> HttpResponse {
    HttpResponse::build(status).json(ErrorMessage { error: message })
}

/// Maps a downstream status onto the server's status type.
pub(crate) fn relay_status(status: http::StatusCode) -> StatusCode {
    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY)
}

pub(crate) fn downstream_status(err: &ClusterClientError) -> StatusCode {
    match err {
        ClusterClientError::InvalidCredentials(_) | ClusterClientError::InvalidRequest(_) => {
            StatusCode::BAD_REQUEST
        }
        ClusterClientError::Upstream { status, .. } => relay_status(*status),
        ClusterClientError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ClusterClientError::Transport(_)
        | ClusterClientError::Body(_)
        | ClusterClientError::Decode(_)
        | ClusterClientError::MissingIdentity(_)
        | ClusterClientError::Closed => StatusCode::BAD_GATEWAY,
    }
}

/// Builds the response for a failed downstream call. Structured downstream errors keep
/// their own status and body.
pub(crate) fn downstream_error_response(err: &ClusterClientError) -> HttpResponse {
    match err {
        ClusterClientError::Upstream { status, body } => HttpResponse::build(relay_status(*status))
            .insert_header(ContentType::json())
            .body(body.clone()),
        err => error_response(downstream_status(err), err.to_string()),
    }
}

use actix_web::{
    HttpRequest, HttpResponse, ResponseError,
    http::{
        StatusCode,
        header::{HeaderName, HeaderValue},
    },
    web::{Bytes, Data, Path, Query},
};
use thiserror::Error;
use tracing_actix_web::RootSpan;

use crate::clusters::proxy::{ForwardError, ForwardRequest, RequestProxy};
use crate::routes::{downstream_error_response, downstream_status, error_response, relay_status};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("The request method {0} is not supported")]
    UnsupportedMethod(String),

    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UnsupportedMethod(_) => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::Forward(ForwardError::ClusterNotFound(_)) => StatusCode::NOT_FOUND,
            ProxyError::Forward(ForwardError::Downstream(err)) => downstream_status(err),
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ProxyError::Forward(ForwardError::Downstream(err)) => downstream_error_response(err),
            e => error_response(e.status_code(), e.to_string()),
        }
    }
}

/// Copies the inbound headers into the header types used by the cluster clients.
/// Headers that are not valid there are dropped.
fn inbound_headers(req: &HttpRequest) -> http::HeaderMap {
    let mut headers = http::HeaderMap::with_capacity(req.headers().len());
    for (name, value) in req.headers() {
        let (Ok(name), Ok(value)) = (
            http::HeaderName::from_bytes(name.as_str().as_bytes()),
            http::HeaderValue::from_bytes(value.as_bytes()),
        ) else {
            continue;
        };
        headers.append(name, value);
    }

    headers
}

#[utoipa::path(
    method(get, post, put, patch, delete, head, options),
    path = "/apis/server/v1/proxy/cluster/{code}/{path}",
    params(
        ("code" = String, Path, description = "Code of the cluster"),
        ("path" = String, Path, description = "Path on the cluster's API server"),
    ),
    responses(
        (status = 200, description = "Response of the cluster's API server, relayed as is"),
        (status = 404, description = "Cluster not found", body = crate::routes::ErrorMessage),
        (status = 502, description = "Cluster unreachable", body = crate::routes::ErrorMessage),
        (status = 504, description = "Cluster did not answer in time", body = crate::routes::ErrorMessage),
    ),
    tag = "Proxy"
)]
pub async fn proxy_request(
    proxy: Data<RequestProxy>,
    req: HttpRequest,
    route: Path<(String, String)>,
    query: Query<Vec<(String, String)>>,
    body: Bytes,
    root_span: RootSpan,
) -> Result<HttpResponse, ProxyError> {
    let (code, path) = route.into_inner();

    root_span.record("cluster_code", &code);

    let method = http::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|_| ProxyError::UnsupportedMethod(req.method().to_string()))?;
    let request = ForwardRequest {
        method,
        path,
        query: query.into_inner(),
        headers: inbound_headers(&req),
        body,
    };

    let response = proxy.forward(&code, request).await?;

    let mut builder = HttpResponse::build(relay_status(response.status));
    for (name, value) in &response.headers {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) else {
            continue;
        };
        builder.append_header((name, value));
    }

    Ok(builder.body(response.body))
}

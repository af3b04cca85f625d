use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::application::{auth::Principal, error::ErrorReport};

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Per-request correlation id, echoed back in `x-request-id`.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(id);

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Logs 4xx at warn and 5xx at error, with whatever `ErrorReport` the handler attached.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.to_string())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let elapsed_ms = started.elapsed().as_millis() as u64;
    // Auth runs inside the router, so the principal comes back on the response.
    let principal = response.extensions().get::<Principal>().copied();
    let user_id = principal.map(|principal| principal.user_id);
    let role = principal.map(|principal| principal.role.as_str());

    let report = response.extensions_mut().remove::<ErrorReport>();
    let origin = report.as_ref().map_or("unknown", |report| report.origin);
    let detail = report
        .as_ref()
        .map_or("no diagnostic available", ErrorReport::headline)
        .to_owned();
    let chain = report.map(|report| report.chain).unwrap_or_default();

    if status.is_server_error() {
        error!(
            target: "pennant::http::response",
            status = status.as_u16(),
            %method,
            %path,
            elapsed_ms,
            origin,
            %detail,
            ?chain,
            %request_id,
            user_id,
            role,
            "request failed",
        );
    } else {
        warn!(
            target: "pennant::http::response",
            status = status.as_u16(),
            %method,
            %path,
            elapsed_ms,
            origin,
            %detail,
            %request_id,
            user_id,
            role,
            "request rejected",
        );
    }

    response
}

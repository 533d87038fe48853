//! Gateway errors and the structured JSON error surface.
//!
//! Plain forwards that fail are answered with a JSON body carrying the
//! machine-readable `error` code, a human `message`, and the request's
//! correlation id. Failures on paths that cannot carry a structured answer
//! (upgrade relays) surface as [`GatewayError`] and abort the connection.

use bytes::Bytes;
use hyper::{Response, StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::body::{full_body, ProxyBody};
use crate::proxy::HEADER_REQUEST_ID;

/// Errors that abort request handling without a structured HTTP answer.
///
/// Returned from the connection service, these make hyper drop the inbound
/// connection, which is the contract for failed upgrade relays.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// No worker was registered when an upgrade request arrived.
    #[error("no worker available for upgrade")]
    NoWorker,

    /// A forward target could not be assembled from the worker url.
    #[error("invalid forward target {target:?}: {source}")]
    Target {
        target: String,
        source: http::uri::InvalidUri,
    },

    /// The worker url carries no host to connect to.
    #[error("worker url {url:?} has no host")]
    MissingAuthority { url: String },

    /// TCP connect to the worker failed.
    #[error("worker connect failed: {0}")]
    Connect(#[from] std::io::Error),

    /// The HTTP exchange with the worker failed.
    #[error("worker exchange failed: {0}")]
    Exchange(#[from] hyper::Error),

    /// The pooled client could not complete the forward.
    #[error("worker request failed: {0}")]
    Forward(#[from] hyper_util::client::legacy::Error),

    /// Building the outbound request failed.
    #[error("outbound request build failed: {0}")]
    RequestBuild(#[from] http::Error),
}

/// Build a JSON response that also echoes the correlation id as a header.
pub(crate) fn json_response(
    status: StatusCode,
    body: &serde_json::Value,
    request_id: &str,
) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .header(HEADER_REQUEST_ID, request_id)
        .body(full_body(Bytes::from(body.to_string())))
        .unwrap()
}

/// 503 for plain requests that arrive while no workers are registered.
pub(crate) fn service_unavailable(request_id: &str) -> Response<ProxyBody> {
    json_response(
        StatusCode::SERVICE_UNAVAILABLE,
        &json!({
            "error": "Service Unavailable",
            "message": "no workers are registered to serve traffic",
            "request_id": request_id,
        }),
        request_id,
    )
}

/// 502 for plain forwards that failed against the dispatched worker.
pub(crate) fn bad_gateway(request_id: &str) -> Response<ProxyBody> {
    json_response(
        StatusCode::BAD_GATEWAY,
        &json!({
            "error": "Bad Gateway",
            "message": "the dispatched worker did not produce a response",
            "request_id": request_id,
        }),
        request_id,
    )
}

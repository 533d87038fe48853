//! Liveness surface served by the gateway itself.
//!
//! A fixed set of well-known GET paths answers from the registry without
//! touching the rotation cursor, so monitoring probes never skew which
//! worker real traffic lands on. Any other method on these paths is proxied
//! like ordinary traffic.

use hyper::{Method, Response, StatusCode};
use rotor_registry::normalize::to_iso8601;
use rotor_registry::WorkerRegistry;
use serde_json::json;

use crate::body::ProxyBody;
use crate::error::json_response;

/// Paths answered by the gateway when requested with GET.
pub const HEALTH_PATHS: &[&str] = &["/healthz", "/health", "/status"];

/// Whether this request is for the gateway's own health surface.
pub fn is_health_request(method: &Method, path: &str) -> bool {
    method == Method::GET && HEALTH_PATHS.contains(&path)
}

/// 200 report of the registered worker set, in dispatch order.
pub fn health_response(registry: &WorkerRegistry, request_id: &str) -> Response<ProxyBody> {
    let workers: Vec<serde_json::Value> = registry
        .snapshot()
        .into_iter()
        .map(|record| {
            json!({
                "key": record.key,
                "url": record.url,
                "version": record.version,
                "upload_at": to_iso8601(record.upload_at),
            })
        })
        .collect();

    let body = json!({
        "status": "ok",
        "total_workers": workers.len(),
        "workers": workers,
    });

    json_response(StatusCode::OK, &body, request_id)
}

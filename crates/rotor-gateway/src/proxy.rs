//! Request forwarding to dispatched workers.
//!
//! Plain requests go through a pooled hyper client: method, headers and body
//! are preserved, hop-by-hop headers are stripped, the host is rewritten to
//! the target, and forwarded-for metadata plus the worker's identity headers
//! are attached. Redirects from the worker pass through to the client
//! untouched.
//!
//! Connection upgrades take a dedicated HTTP/1.1 handshake to the worker;
//! once both sides have switched protocols the two raw streams are joined
//! and bytes are copied in both directions until either side closes.

use std::net::IpAddr;

use bytes::Bytes;
use http::uri::Uri;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderValue};
use hyper::{Request, Response, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rotor_registry::WorkerRecord;
use tokio::net::TcpStream;
use tracing::debug;
use uuid::Uuid;

use crate::body::ProxyBody;
use crate::error::GatewayError;

/// Correlation id, echoed on every answer and propagated to the worker.
pub const HEADER_REQUEST_ID: &str = "x-request-id";
/// Key of the worker a request was dispatched to.
pub const HEADER_WORKER_KEY: &str = "x-worker-key";
/// Version label of the dispatched worker.
pub const HEADER_WORKER_VERSION: &str = "x-worker-version";

const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";
const HEADER_FORWARDED_PROTO: &str = "x-forwarded-proto";
const HEADER_FORWARDED_HOST: &str = "x-forwarded-host";

/// Headers scoped to one hop, dropped before a plain forward.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The request's correlation id: the inbound `x-request-id` when the caller
/// supplied one, else a fresh v4 UUID.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(HEADER_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Whether the request asks to switch protocols (`Connection: upgrade` with
/// an `Upgrade` header present).
pub fn is_upgrade(headers: &HeaderMap) -> bool {
    let wants_upgrade = headers
        .get(header::CONNECTION)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
        .unwrap_or(false);
    wants_upgrade && headers.contains_key(header::UPGRADE)
}

/// Forwards requests to workers over HTTP/1.1.
pub struct Forwarder {
    client: Client<HttpConnector, Incoming>,
}

impl Forwarder {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    /// Forward a plain request to the worker, preserving method, headers
    /// and body. Fails when the worker cannot be reached or its url does
    /// not form a target; the caller maps that to a 502.
    pub async fn forward(
        &self,
        req: Request<Incoming>,
        worker: &WorkerRecord,
        request_id: &str,
        client_ip: IpAddr,
    ) -> Result<Response<ProxyBody>, GatewayError> {
        let target = target_uri(&worker.url, path_and_query(req.uri()))?;
        let (mut parts, body) = req.into_parts();

        let original_host = parts.headers.get(header::HOST).cloned();
        for name in HOP_BY_HOP {
            parts.headers.remove(*name);
        }
        apply_forward_headers(
            &mut parts.headers,
            &target,
            worker,
            request_id,
            client_ip,
            original_host,
        );
        parts.uri = target;

        let response = self.client.request(Request::from_parts(parts, body)).await?;
        Ok(response.map(BodyExt::boxed))
    }

    /// Relay a protocol upgrade through the worker.
    ///
    /// The handshake request is replayed against the worker on a dedicated
    /// connection. A non-101 answer means the worker refused the switch and
    /// is relayed as a plain response. On 101 the worker's handshake headers
    /// are echoed to the client and a background task joins the two upgraded
    /// streams; the relay ends when either side closes.
    ///
    /// Any error here aborts the inbound connection: once the client expects
    /// a protocol switch there is no structured answer left to give.
    pub async fn relay_upgrade(
        &self,
        mut req: Request<Incoming>,
        worker: &WorkerRecord,
        request_id: &str,
        client_ip: IpAddr,
    ) -> Result<Response<ProxyBody>, GatewayError> {
        let target = target_uri(&worker.url, path_and_query(req.uri()))?;
        let host = target
            .host()
            .ok_or_else(|| GatewayError::MissingAuthority { url: worker.url.clone() })?
            .to_string();
        let port = target.port_u16().unwrap_or(80);

        // Claim the inbound upgrade before the request is consumed. It
        // resolves once hyper has written our 101 to the client.
        let inbound_upgrade = hyper::upgrade::on(&mut req);

        // Replay the handshake verbatim: upgrade negotiation headers must
        // reach the worker, so nothing is stripped here.
        let original_host = req.headers().get(header::HOST).cloned();
        let mut outbound = Request::builder()
            .method(req.method().clone())
            .uri(&target)
            .body(Empty::<Bytes>::new())?;
        *outbound.headers_mut() = req.headers().clone();
        apply_forward_headers(
            outbound.headers_mut(),
            &target,
            worker,
            request_id,
            client_ip,
            original_host,
        );

        let stream = TcpStream::connect((host.as_str(), port)).await?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(err) = conn.with_upgrades().await {
                debug!(error = %err, "worker upgrade connection closed");
            }
        });

        let mut response = sender.send_request(outbound).await?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            // Handshake refused downstream; hand the answer back as-is.
            return Ok(response.map(BodyExt::boxed));
        }

        let handshake_headers = response.headers().clone();
        let outbound_upgrade = hyper::upgrade::on(&mut response);

        let relay_id = request_id.to_string();
        tokio::spawn(async move {
            match tokio::try_join!(inbound_upgrade, outbound_upgrade) {
                Ok((client_side, worker_side)) => {
                    let mut client_side = TokioIo::new(client_side);
                    let mut worker_side = TokioIo::new(worker_side);
                    match tokio::io::copy_bidirectional(&mut client_side, &mut worker_side).await {
                        Ok((to_worker, to_client)) => debug!(
                            request_id = %relay_id,
                            bytes_up = to_worker,
                            bytes_down = to_client,
                            "upgrade relay closed"
                        ),
                        Err(err) => {
                            debug!(request_id = %relay_id, error = %err, "upgrade relay ended")
                        }
                    }
                }
                Err(err) => debug!(request_id = %relay_id, error = %err, "upgrade never completed"),
            }
        });

        let mut reply = Response::builder()
            .status(StatusCode::SWITCHING_PROTOCOLS)
            .body(crate::body::full_body(Bytes::new()))?;
        *reply.headers_mut() = handshake_headers;
        Ok(reply)
    }
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble the forward target: worker base url (trailing `/` trimmed) plus
/// the original path and query.
fn target_uri(base: &str, path_and_query: &str) -> Result<Uri, GatewayError> {
    let target = format!("{}{}", base.trim_end_matches('/'), path_and_query);
    match target.parse::<Uri>() {
        Ok(uri) if uri.host().is_some() => Ok(uri),
        Ok(_) => Err(GatewayError::MissingAuthority { url: base.to_string() }),
        Err(source) => Err(GatewayError::Target { target, source }),
    }
}

fn path_and_query(uri: &Uri) -> &str {
    uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
}

/// Rewrite the host to the target and attach the proxy metadata: request id,
/// worker identity, and the forwarded-for chain.
fn apply_forward_headers(
    headers: &mut HeaderMap,
    target: &Uri,
    worker: &WorkerRecord,
    request_id: &str,
    client_ip: IpAddr,
    original_host: Option<HeaderValue>,
) {
    if let Some(authority) = target.authority() {
        if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
            headers.insert(header::HOST, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(HEADER_REQUEST_ID, value);
    }
    if let Ok(value) = HeaderValue::from_str(&worker.key) {
        headers.insert(HEADER_WORKER_KEY, value);
    }
    if let Ok(value) = HeaderValue::from_str(&worker.version) {
        headers.insert(HEADER_WORKER_VERSION, value);
    }

    let forwarded_for = match headers.get(HEADER_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(HEADER_FORWARDED_FOR, value);
    }
    headers.insert(HEADER_FORWARDED_PROTO, HeaderValue::from_static("http"));
    if let Some(host) = original_host {
        headers.insert(HEADER_FORWARDED_HOST, host);
    }
}

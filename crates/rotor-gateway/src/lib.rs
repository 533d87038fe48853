//! rotor-gateway: the HTTP surface of the round-robin dispatcher.
//!
//! One listener serves three kinds of traffic:
//! - well-known GET health paths, answered from the registry without
//!   consuming a rotation;
//! - plain requests, dispatched to the next worker in rotation and
//!   forwarded (503 when no worker is registered, 502 when the dispatched
//!   worker is unreachable);
//! - connection upgrades, relayed byte-for-byte after the handshake; when
//!   dispatch or relay fails the connection is destroyed, since no
//!   structured answer is possible mid-switch.

pub mod body;
pub mod error;
pub mod health;
pub mod proxy;

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Context;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use rotor_registry::{Dispatcher, WorkerRegistry};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::body::ProxyBody;
use crate::proxy::Forwarder;

pub use error::GatewayError;

/// The reverse-proxy gateway.
///
/// Owns no worker state itself: the registry answers health reads, the
/// dispatcher picks the target, and the forwarder moves the bytes. Exactly
/// one rotation is consumed per proxied request or upgrade, whatever the
/// downstream outcome.
pub struct ProxyGateway {
    registry: WorkerRegistry,
    dispatcher: Dispatcher,
    forwarder: Forwarder,
}

impl ProxyGateway {
    pub fn new(registry: WorkerRegistry, dispatcher: Dispatcher) -> Self {
        Self {
            registry,
            dispatcher,
            forwarder: Forwarder::new(),
        }
    }

    /// Serve connections from an already bound listener until shutdown.
    ///
    /// Spawns a task per accepted connection, HTTP/1.1 with upgrade
    /// support. In-flight connections finish on their own tasks after
    /// shutdown is signaled.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr().context("listener has no local address")?;
        info!(%addr, "gateway listening");

        let gateway = Arc::new(self);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = accepted.context("accept failed")?;
                    let gateway = gateway.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let svc = service_fn(move |req: Request<Incoming>| {
                            let gateway = gateway.clone();
                            async move { gateway.handle(req, peer_addr.ip()).await }
                        });

                        if let Err(err) = http1::Builder::new()
                            .serve_connection(io, svc)
                            .with_upgrades()
                            .await
                        {
                            debug!(%peer_addr, error = %err, "connection closed with error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("gateway shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Triage one request: health short-circuit first, then dispatch, then
    /// forward or relay.
    ///
    /// Returns `Err` only where the contract is to destroy the connection
    /// (failed upgrades); every other outcome is a structured response.
    async fn handle(
        &self,
        req: Request<Incoming>,
        client_ip: IpAddr,
    ) -> Result<Response<ProxyBody>, GatewayError> {
        let request_id = proxy::correlation_id(req.headers());
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        if health::is_health_request(&method, &path) {
            debug!(%request_id, %path, "health report served");
            return Ok(health::health_response(&self.registry, &request_id));
        }

        let upgrade = proxy::is_upgrade(req.headers());

        let worker = match self.dispatcher.next() {
            Ok(worker) => worker,
            Err(err) if upgrade => {
                // Mid-handshake there is no structured answer left to give.
                warn!(%request_id, %method, %path, error = %err, "destroying upgrade connection");
                return Err(GatewayError::NoWorker);
            }
            Err(err) => {
                warn!(%request_id, %method, %path, error = %err, "rejecting request");
                return Ok(error::service_unavailable(&request_id));
            }
        };

        if upgrade {
            match self
                .forwarder
                .relay_upgrade(req, &worker, &request_id, client_ip)
                .await
            {
                Ok(response) => {
                    info!(
                        %request_id,
                        %method,
                        %path,
                        worker = %worker.key,
                        status = %response.status(),
                        "upgrade dispatched"
                    );
                    Ok(response)
                }
                Err(err) => {
                    warn!(
                        %request_id,
                        %method,
                        %path,
                        worker = %worker.key,
                        error = %err,
                        "upgrade relay failed, destroying connection"
                    );
                    Err(err)
                }
            }
        } else {
            match self
                .forwarder
                .forward(req, &worker, &request_id, client_ip)
                .await
            {
                Ok(response) => {
                    info!(
                        %request_id,
                        %method,
                        %path,
                        worker = %worker.key,
                        status = %response.status(),
                        "request forwarded"
                    );
                    Ok(response)
                }
                Err(err) => {
                    warn!(
                        %request_id,
                        %method,
                        %path,
                        worker = %worker.key,
                        error = %err,
                        "worker unreachable"
                    );
                    Ok(error::bad_gateway(&request_id))
                }
            }
        }
    }
}

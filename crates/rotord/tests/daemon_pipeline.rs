//! Regression tests for the assembled daemon pipeline.
//!
//! Wires the same components `rotord serve` does — file feed, registry
//! sync, gateway — around a temp state file, then drives real HTTP through
//! the stack while the file changes underneath it.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use rotor_feed::{FeedSync, FileFeed};
use rotor_gateway::ProxyGateway;
use rotor_registry::{Dispatcher, WorkerRegistry};
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};

/// A fake worker that answers 200 with its name.
async fn spawn_worker(name: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let svc = service_fn(move |_req: Request<Incoming>| async move {
                    Ok::<_, hyper::Error>(Response::new(Full::new(Bytes::from(name))))
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });

    addr
}

/// Assemble feed, sync and gateway around `state_file`, mirroring the
/// daemon's own wiring, and serve on an ephemeral port.
async fn start_pipeline(state_file: &Path) -> (SocketAddr, watch::Sender<bool>) {
    let registry = WorkerRegistry::new();
    let dispatcher = Dispatcher::new(registry.clone());
    let gateway = ProxyGateway::new(registry.clone(), dispatcher);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (events_tx, events_rx) = mpsc::channel(16);

    let feed = FileFeed::new(state_file, Duration::from_millis(20));
    tokio::spawn(feed.run(events_tx, shutdown_rx.clone()));
    tokio::spawn(FeedSync::new(registry).run(events_rx, shutdown_rx.clone()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(gateway.serve(listener, shutdown_rx));

    (addr, shutdown_tx)
}

async fn http_get(addr: SocketAddr, path: &str) -> (StatusCode, Bytes) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(header::HOST, "rotord.test")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = sender.send_request(req).await.unwrap();
    let (parts, body) = response.into_parts();
    (parts.status, body.collect().await.unwrap().to_bytes())
}

async fn health(addr: SocketAddr) -> Value {
    let (status, body) = http_get(addr, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

/// Poll the health surface until the registered keys match.
async fn wait_for_worker_keys(addr: SocketAddr, expected: &[&str]) {
    for _ in 0..200 {
        let report = health(addr).await;
        let keys: Vec<&str> = report["workers"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|w| w["key"].as_str())
            .collect();
        if keys == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("registry never converged on {expected:?}");
}

fn write_state(path: &Path, doc: &Value) {
    std::fs::write(path, serde_json::to_vec(doc).unwrap()).unwrap();
}

#[tokio::test]
async fn state_file_drives_registry_and_rotation() {
    let early = spawn_worker("early").await;
    let late = spawn_worker("late").await;

    let file = NamedTempFile::new().unwrap();
    // Document order is not rotation order: "late" listed first.
    std::fs::write(
        file.path(),
        format!(
            r#"{{
                "w-late": {{ "url": "http://{late}", "upload_at": 200 }},
                "w-early": {{ "url": "http://{early}", "upload_at": 100 }}
            }}"#,
        ),
    )
    .unwrap();

    let (addr, _shutdown) = start_pipeline(file.path()).await;
    wait_for_worker_keys(addr, &["w-early", "w-late"]).await;

    let mut served = Vec::new();
    for _ in 0..4 {
        let (status, body) = http_get(addr, "/run").await;
        assert_eq!(status, StatusCode::OK);
        served.push(String::from_utf8(body.to_vec()).unwrap());
    }
    assert_eq!(served, ["early", "late", "early", "late"]);
}

#[tokio::test]
async fn file_updates_shift_traffic_without_restart() {
    let first = spawn_worker("first").await;
    let second = spawn_worker("second").await;

    let file = NamedTempFile::new().unwrap();
    write_state(
        file.path(),
        &json!({ "w-first": { "url": format!("http://{first}"), "upload_at": 100 } }),
    );

    let (addr, _shutdown) = start_pipeline(file.path()).await;
    wait_for_worker_keys(addr, &["w-first"]).await;

    let (_, body) = http_get(addr, "/run").await;
    assert_eq!(body, "first");

    // Swap the worker set on disk; traffic follows within a poll interval.
    write_state(
        file.path(),
        &json!({ "w-second": { "url": format!("http://{second}"), "upload_at": 200 } }),
    );
    wait_for_worker_keys(addr, &["w-second"]).await;

    let (_, body) = http_get(addr, "/run").await;
    assert_eq!(body, "second");
}

#[tokio::test]
async fn broken_state_file_keeps_serving_last_known_workers() {
    let worker = spawn_worker("survivor").await;

    let file = NamedTempFile::new().unwrap();
    write_state(
        file.path(),
        &json!({ "w-1": { "url": format!("http://{worker}"), "upload_at": 100 } }),
    );

    let (addr, _shutdown) = start_pipeline(file.path()).await;
    wait_for_worker_keys(addr, &["w-1"]).await;

    // Corrupt the document; several poll intervals pass.
    std::fs::write(file.path(), "{ not json").unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;

    // The registry and the traffic it serves are unaffected.
    let report = health(addr).await;
    assert_eq!(report["total_workers"], 1);
    let (status, body) = http_get(addr, "/run").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "survivor");
}

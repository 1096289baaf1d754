//! Server lifecycle tests: bind, serve, graceful stop, wire-level errors.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use smlm_sim::config::{MicroscopeConfig, ServerConfig};
use smlm_sim::server::{RpcServer, RpcService};

fn service() -> Arc<RpcService> {
    Arc::new(RpcService::new(&ServerConfig::default()))
}

async fn send(addr: SocketAddr, request: String) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    response
}

fn get(addr: SocketAddr, path: &str) -> String {
    format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n")
}

fn post_json(addr: SocketAddr, path: &str, body: &str) -> String {
    format!(
        "POST {path} HTTP/1.1\r\nHost: {addr}\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[tokio::test]
async fn test_bind_serve_and_stop() {
    let server = RpcServer::bind("127.0.0.1:0", service()).await.expect("bind");
    assert!(server.is_serving());
    assert_ne!(server.local_addr().port(), 0);
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn test_status_over_the_wire() {
    let server = RpcServer::bind("127.0.0.1:0", service()).await.expect("bind");
    let addr = server.local_addr();

    let response = send(addr, get(addr, "/api/status")).await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("SASS RPC server is running."), "{response}");

    server.stop().await.expect("stop");
}

#[tokio::test]
async fn test_unknown_id_maps_to_404() {
    let server = RpcServer::bind("127.0.0.1:0", service()).await.expect("bind");
    let addr = server.local_addr();

    let response = send(addr, get(addr, "/api/simulations/99/image-count")).await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    server.stop().await.expect("stop");
}

#[tokio::test]
async fn test_malformed_create_body_is_rejected_not_defaulted() {
    let service = service();
    let server = RpcServer::bind("127.0.0.1:0", Arc::clone(&service))
        .await
        .expect("bind");
    let addr = server.local_addr();

    // Parseable JSON, but not a valid config document.
    let response = send(
        addr,
        post_json(
            addr,
            "/api/simulations",
            r#"{"camera": {"quantum_efficiency": 5.0}}"#,
        ),
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 422"), "{response}");
    assert!(
        service.list_simulations().await.is_empty(),
        "registry must stay empty after a rejected create"
    );

    // A complete valid body still creates.
    let body = serde_json::to_string(&MicroscopeConfig::default()).expect("serialize");
    let response = send(addr, post_json(addr, "/api/simulations", &body)).await;
    assert!(response.starts_with("HTTP/1.1 201"), "{response}");
    assert_eq!(service.list_simulations().await.len(), 1);

    // An empty body falls back to the server template.
    let response = send(addr, post_json(addr, "/api/simulations", "")).await;
    assert!(response.starts_with("HTTP/1.1 201"), "{response}");
    assert_eq!(service.list_simulations().await.len(), 2);

    server.stop().await.expect("stop");
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_request() {
    let service = service();
    let server = RpcServer::bind("127.0.0.1:0", Arc::clone(&service))
        .await
        .expect("bind");
    let addr = server.local_addr();

    let id = service.create_simulation(None).await.expect("create");
    let instance = service.manager().get(id).await.expect("get");
    // Hold the instance lock so the request below parks inside its handler.
    let guard = instance.lock().await;

    let client = tokio::spawn(send(
        addr,
        get(addr, &format!("/api/simulations/{id}/image-count")),
    ));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopping = tokio::spawn(server.stop());
    tokio::time::sleep(Duration::from_millis(100)).await;
    // The drain must not complete while a request is still in flight.
    assert!(!stopping.is_finished());

    drop(guard);
    let response = client.await.expect("client task");
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    stopping.await.expect("stop task").expect("stop");
}

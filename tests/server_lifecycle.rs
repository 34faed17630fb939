//! Black-box tests for process startup and the operational endpoints.

mod common;

use common::{TestOptions, TestServer};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[tokio::test]
async fn starts_from_a_generated_config_and_serves_websockets() {
    let server = TestServer::spawn(18071).await.expect("spawn failed");

    let mut client = server.connect().await.expect("handshake failed");
    // Prove the router is live with a frame that must be answered.
    client
        .send_action("does_not_exist", 1, json!({}))
        .await
        .expect("send failed");
    let reply = client.recv_json().await.expect("no reply");
    assert_eq!(reply["status"], "FAIL");
    assert_eq!(reply["seq_reply"], 1);

    // A second client on the same process.
    let mut other = server.connect().await.expect("second handshake failed");
    other
        .send_action("does_not_exist", 1, json!({}))
        .await
        .expect("send failed");
    assert_eq!(other.recv_json().await.expect("no reply")["status"], "FAIL");
}

#[tokio::test]
async fn serves_health_and_metrics_endpoints() {
    let server = TestServer::spawn_with(
        18072,
        TestOptions {
            metrics_port: Some(19072),
            ..Default::default()
        },
    )
    .await
    .expect("spawn failed");

    // The metrics listener binds on its own task after the gateway.
    common::server::wait_for_port(19072)
        .await
        .expect("metrics port never opened");

    let health = http_get("127.0.0.1:19072", "/healthz")
        .await
        .expect("healthz request failed");
    assert!(health.starts_with("HTTP/1.1 200"), "unexpected: {health}");
    assert!(health.ends_with("OK"), "unexpected body: {health}");

    let metrics = http_get("127.0.0.1:19072", "/metrics")
        .await
        .expect("metrics request failed");
    assert!(
        metrics.contains("parleyd_websocket_connections"),
        "metrics scrape missing gauge: {metrics}"
    );

    drop(server);
}

async fn http_get(addr: &str, path: &str) -> anyhow::Result<String> {
    let mut stream = tokio::net::TcpStream::connect(addr).await?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    let mut response = String::new();
    stream.read_to_string(&mut response).await?;
    Ok(response)
}

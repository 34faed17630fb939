//! Black-box tests for the websocket origin check.

mod common;

use common::{TestOptions, TestServer};
use tokio_tungstenite::tungstenite;

#[tokio::test]
async fn cross_origin_browsers_are_refused() {
    let server = TestServer::spawn_with(
        18091,
        TestOptions {
            site_url: "https://chat.example.com".to_string(),
            ..Default::default()
        },
    )
    .await
    .expect("spawn failed");

    // Same origin passes.
    let request = ws_request(&server.address(), Some("https://chat.example.com"));
    tokio_tungstenite::connect_async(request)
        .await
        .expect("same-origin handshake refused");

    // Native clients send no Origin header and pass.
    let _native = server.connect().await.expect("no-origin handshake refused");

    // Foreign origins are refused before the upgrade.
    let request = ws_request(&server.address(), Some("https://evil.example.com"));
    let err = tokio_tungstenite::connect_async(request)
        .await
        .expect_err("foreign origin was accepted");
    match err {
        tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 403);
        }
        other => panic!("expected http rejection, got: {other:?}"),
    }
}

fn ws_request(addr: &str, origin: Option<&str>) -> http::Request<()> {
    let mut builder = http::Request::builder()
        .uri(format!("ws://{addr}/"))
        .header("Host", addr)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        );
    if let Some(origin) = origin {
        builder = builder.header("Origin", origin);
    }
    builder.body(()).expect("request build failed")
}

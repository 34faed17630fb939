//! Black-box tests for the websocket frame protocol before authentication.

mod common;

use common::TestServer;
use serde_json::json;

#[tokio::test]
async fn actions_require_authentication() {
    let server = TestServer::spawn(18081).await.expect("spawn failed");
    let mut client = server.connect().await.expect("handshake failed");

    client
        .send_action("user_typing", 1, json!({"channel_id": "c1"}))
        .await
        .expect("send failed");
    let reply = client.recv_json().await.expect("no reply");
    assert_eq!(reply["status"], "FAIL");
    assert_eq!(reply["seq_reply"], 1);
    assert_eq!(
        reply["error"]["id"],
        "app.websocket.route.not_authenticated.app_error"
    );

    // The connection survives the rejection.
    client
        .send_action("get_statuses", 2, json!({}))
        .await
        .expect("send failed");
    let reply = client.recv_json().await.expect("no reply");
    assert_eq!(reply["seq_reply"], 2);
    assert_eq!(
        reply["error"]["id"],
        "app.websocket.route.not_authenticated.app_error"
    );
}

#[tokio::test]
async fn frame_violations_are_answered_in_place() {
    let server = TestServer::spawn(18082).await.expect("spawn failed");
    let mut client = server.connect().await.expect("handshake failed");

    client
        .send_action("user_typing", 0, json!({}))
        .await
        .expect("send failed");
    let reply = client.recv_json().await.expect("no reply");
    assert_eq!(reply["error"]["id"], "app.websocket.route.bad_seq.app_error");

    client
        .send_action("no_such_action", 1, json!({}))
        .await
        .expect("send failed");
    let reply = client.recv_json().await.expect("no reply");
    assert_eq!(
        reply["error"]["id"],
        "app.websocket.route.bad_action.app_error"
    );

    client
        .send_action("", 2, json!({}))
        .await
        .expect("send failed");
    let reply = client.recv_json().await.expect("no reply");
    assert_eq!(
        reply["error"]["id"],
        "app.websocket.route.no_action.app_error"
    );
}

#[tokio::test]
async fn bad_token_fails_the_handshake_and_closes() {
    let server = TestServer::spawn(18083).await.expect("spawn failed");
    let mut client = server.connect().await.expect("handshake failed");

    client
        .send_action("authentication_challenge", 1, json!({"token": "not-a-token"}))
        .await
        .expect("send failed");
    let reply = client.recv_json().await.expect("no reply");
    assert_eq!(reply["status"], "FAIL");
    assert_eq!(
        reply["error"]["id"],
        "app.session.get.invalid_token.app_error"
    );
    client.expect_close().await.expect("socket should close");
}

#[tokio::test]
async fn malformed_frames_close_the_connection() {
    let server = TestServer::spawn(18084).await.expect("spawn failed");
    let mut client = server.connect().await.expect("handshake failed");

    client
        .send_raw("this is not json")
        .await
        .expect("send failed");
    client.expect_close().await.expect("socket should close");
}

//! Test websocket client.
//!
//! Speaks the frame protocol: `{action, seq, data}` requests and
//! `{status, seq_reply, ...}` replies, JSON over websocket text frames.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(address: &str) -> anyhow::Result<Self> {
        let (ws, _) = connect_async(format!("ws://{address}/")).await?;
        Ok(Self { ws })
    }

    /// Sends one request frame.
    pub async fn send_action(&mut self, action: &str, seq: i64, data: Value) -> anyhow::Result<()> {
        let frame = json!({"action": action, "seq": seq, "data": data});
        self.ws.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Sends a raw text frame, bypassing the frame format.
    pub async fn send_raw(&mut self, raw: &str) -> anyhow::Result<()> {
        self.ws.send(Message::Text(raw.to_string())).await?;
        Ok(())
    }

    /// Receives the next text frame as JSON.
    pub async fn recv_json(&mut self) -> anyhow::Result<Value> {
        loop {
            let frame = timeout(Duration::from_secs(5), self.ws.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
            match frame {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(_) => anyhow::bail!("connection closed"),
                _ => continue,
            }
        }
    }

    /// Asserts the server closes the connection without sending further
    /// data frames.
    pub async fn expect_close(&mut self) -> anyhow::Result<()> {
        loop {
            match timeout(Duration::from_secs(5), self.ws.next()).await? {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return Ok(()),
                Some(Ok(Message::Text(text))) => anyhow::bail!("unexpected frame: {text}"),
                Some(Ok(_)) => continue,
            }
        }
    }
}

//! Duplex transport abstraction and its tokio-tungstenite implementation.
//!
//! The session manager only speaks [`DuplexTransport`]; each reconnect
//! attempt asks the [`Connector`] for a fresh transport. Tests substitute
//! scripted implementations.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::error::MeridianError;

/// A received frame, reduced to what the session layer cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Server closed the connection, with the close code when present.
    Close(Option<u16>),
}

/// One live bidirectional connection.
#[async_trait]
pub trait DuplexTransport: Send {
    /// Send a text frame.
    async fn send(&mut self, text: String) -> Result<(), MeridianError>;

    /// Receive the next frame. `None` means the stream ended without a close
    /// frame.
    async fn next_frame(&mut self) -> Option<Result<Frame, MeridianError>>;

    /// Close the connection (best-effort).
    async fn close(&mut self);
}

/// Factory producing a fresh transport per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    type Transport: DuplexTransport;

    async fn connect(&self) -> Result<Self::Transport, MeridianError>;
}

// ---------------------------------------------------------------------------
// tokio-tungstenite implementation
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects TLS WebSockets to a fixed URL with optional extra handshake
/// headers.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    extra_headers: HashMap<String, String>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            extra_headers: HashMap::new(),
        }
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = headers;
        self
    }
}

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn connect(&self) -> Result<WsTransport, MeridianError> {
        use tokio_tungstenite::tungstenite::http::Request;

        let mut request = Request::builder()
            .uri(&self.url)
            .header("Host", extract_host(&self.url));

        for (key, value) in &self.extra_headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let request = request
            .body(())
            .map_err(|e| MeridianError::WebSocket(format!("invalid handshake request: {e}")))?;

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| MeridianError::WebSocket(format!("connect failed: {e}")))?;

        Ok(WsTransport { inner: stream })
    }
}

/// [`DuplexTransport`] over a tungstenite WebSocket stream.
pub struct WsTransport {
    inner: WsStream,
}

#[async_trait]
impl DuplexTransport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), MeridianError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| MeridianError::WebSocket(format!("send failed: {e}")))
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, MeridianError>> {
        loop {
            let msg = match self.inner.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(MeridianError::WebSocket(format!("read error: {e}")))),
            };
            match msg {
                Message::Text(text) => return Some(Ok(Frame::Text(text.to_string()))),
                Message::Binary(data) => return Some(Ok(Frame::Binary(data.to_vec()))),
                Message::Ping(data) => {
                    // Keepalive handled here so the session never sees it.
                    if let Err(e) = self.inner.send(Message::Pong(data)).await {
                        return Some(Err(MeridianError::WebSocket(format!(
                            "pong send failed: {e}"
                        ))));
                    }
                }
                Message::Close(frame) => {
                    let code = frame.map(|f| u16::from(f.code));
                    return Some(Ok(Frame::Close(code)));
                }
                _ => {} // Pong, raw frames — ignore
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}

/// Extract the host from a URL string.
fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.host_str().unwrap_or("").to_string())
        .unwrap_or_default()
}

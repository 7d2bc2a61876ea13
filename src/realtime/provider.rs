//! Streaming speech-model collaborator.
//!
//! One persistent WebSocket per session: structured JSON events in both
//! directions, opened with the model name in the query string and bearer
//! auth in the handshake headers.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::{CalvoxError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A live bidirectional event stream to the speech model.
///
/// `recv` is a blocking receive that is **not** safe to call from two call
/// sites concurrently; [`crate::realtime::DuplexSession`] guards it with a
/// session-scoped lock so exactly one logical reader exists.
#[async_trait]
pub trait ModelStream: Send + Sync {
    /// Send one event to the model.
    async fn send(&self, event: Value) -> Result<()>;

    /// Receive the next event. Blocks until an event arrives or the
    /// connection dies (`ConnectionClosed`).
    async fn recv(&self) -> Result<Value>;

    /// Close the underlying connection. Unblocks a pending `recv`.
    async fn close(&self);
}

/// Realtime API connection over `tokio-tungstenite`.
pub struct OpenAiRealtime {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl OpenAiRealtime {
    /// Open one streaming connection for `model`.
    pub async fn connect(base: &str, model: &str, api_key: &str) -> Result<Self> {
        let mut url = Url::parse(base)
            .map_err(|e| CalvoxError::Config(format!("bad realtime endpoint '{base}': {e}")))?;
        url.query_pairs_mut().append_pair("model", model);

        let mut request = url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {api_key}"))
                .map_err(|_| CalvoxError::Config("api key is not header-safe".into()))?,
        );
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws, _) = connect_async(request).await?;
        debug!(%url, "realtime connection established");
        let (sink, stream) = ws.split();
        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

#[async_trait]
impl ModelStream for OpenAiRealtime {
    async fn send(&self, event: Value) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(event.to_string().into()))
            .await
            .map_err(|_| CalvoxError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Value> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                None => return Err(CalvoxError::ConnectionClosed),
                Some(Err(_)) => return Err(CalvoxError::ConnectionClosed),
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).map_err(|e| {
                        CalvoxError::Upstream(format!("unparsable realtime event: {e}"))
                    });
                }
                Some(Ok(Message::Close(_))) => return Err(CalvoxError::ConnectionClosed),
                // Ping/pong and stray binary frames are transport noise.
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn close(&self) {
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    }
}

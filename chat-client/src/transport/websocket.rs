//! WebSocket transport over tokio-tungstenite.
//!
//! The access token travels as a `token` query parameter, which is how the
//! chat server authenticates the socket.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport.
#[derive(Default)]
pub struct WebSocketTransport {
    sink: Mutex<Option<SplitSink<WsStream, Message>>>,
    stream: Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
}

impl WebSocketTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Append the token to the endpoint, validating the scheme.
pub(crate) fn authenticated_url(endpoint: &str, token: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| TransportError::InvalidEndpoint(format!("{endpoint}: {e}")))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(TransportError::InvalidEndpoint(format!(
                "{endpoint}: unsupported scheme {other}"
            )))
        }
    }
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &str, token: &str) -> Result<(), TransportError> {
        let url = authenticated_url(endpoint, token)?;
        let (socket, response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        tracing::debug!(%endpoint, status = %response.status(), "websocket handshake complete");

        let (sink, stream) = socket.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&self) -> Result<String, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return Ok(text),
                    Err(_) => tracing::warn!("dropping non-UTF-8 binary frame"),
                },
                // tungstenite answers pings itself
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "server closed websocket");
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Err(e)) => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    self.connected.store(false, Ordering::SeqCst);
                    return Err(TransportError::ConnectionClosed);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "websocket close handshake failed");
            }
        }
        // A reader still parked in recv() keeps its lock; it fails on its
        // next poll once the sink is gone.
        if let Ok(mut stream) = self.stream.try_lock() {
            stream.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_appended_as_query_parameter() {
        let url = authenticated_url("ws://localhost:8000/ws/chat/", "abc.def").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/chat/?token=abc.def");
    }

    #[test]
    fn existing_query_is_preserved() {
        let url = authenticated_url("wss://chat.example/ws/?v=2", "t").unwrap();
        assert_eq!(url.as_str(), "wss://chat.example/ws/?v=2&token=t");
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        assert!(matches!(
            authenticated_url("not a url", "t"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn http_scheme_is_rejected() {
        assert!(matches!(
            authenticated_url("http://localhost/ws/", "t"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn unconnected_transport_refuses_io() {
        let transport = WebSocketTransport::new();
        assert!(!transport.is_connected());
        assert_eq!(transport.send("x").await, Err(TransportError::NotConnected));
        assert_eq!(transport.recv().await, Err(TransportError::NotConnected));
        transport.close().await;
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let transport = WebSocketTransport::new();
        let result = transport.connect("ws://127.0.0.1:1/ws/", "t").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.is_connected());
    }
}

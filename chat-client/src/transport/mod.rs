//! Transport abstraction for relaychat.
//!
//! This module provides a pluggable transport layer that abstracts the
//! underlying duplex connection (WebSocket, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` opens the connection, authenticating with the access token
//! - `send()` transmits one JSON text frame
//! - `recv()` waits for the next JSON text frame
//! - `close()` terminates; idempotent and infallible
//!
//! Queuing and retry are decided by the supervisor, never by the transport.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.connect("ws://localhost/ws/chat/", "token").await?;
//! transport.send(r#"{"type":"ping","payload":{}}"#).await?;
//! let frame = transport.recv().await?;
//! ```

mod mock;
mod websocket;

pub use mock::MockTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The endpoint is not a valid `ws://` / `wss://` URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Connection failed (refused, DNS, handshake).
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed by the peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Connect or send did not finish in time.
    #[error("{0} timed out")]
    Timeout(&'static str),
}

/// Transport trait for the realtime chat connection.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, mock, etc). `recv()` must be cancel-safe: the supervisor
/// races it against timers and commands.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `endpoint`, authenticating with `token`.
    async fn connect(&self, endpoint: &str, token: &str) -> Result<(), TransportError>;

    /// Send one text frame.
    async fn send(&self, frame: &str) -> Result<(), TransportError>;

    /// Receive the next text frame.
    ///
    /// Blocks until a frame is available or the connection closes.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection. No inbound frames are delivered afterwards.
    async fn close(&self);
}

//! # chat-client
//!
//! Realtime sync client for relaychat.
//!
//! This is the library a chat UI drives: it owns the websocket, keeps it
//! alive, and turns server pushes into conversation state.
//!
//! ## Features
//!
//! - **Supervised connection**: exponential backoff reconnect, keep-alive
//!   pings, FIFO outbound queue while offline
//! - **Optimistic send**: messages show up immediately and are reconciled
//!   with the server's copy
//! - **Presence**: debounced typing indicators and peer online tracking
//! - **Transport abstraction**: pluggable transport (websocket, mock)
//! - **Pure core**: uses chat-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use relaychat_client::{ChatClient, ClientConfig, EventKind, Session, WebSocketTransport};
//!
//! let client = ChatClient::spawn(
//!     ClientConfig::from_file(path)?,
//!     Session::new(user_id, token),
//!     WebSocketTransport::new(),
//! )?;
//! let _sub = client.subscribe(EventKind::MessageNew, |event| println!("{event:?}"));
//! client.connect().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
mod supervisor;
pub mod transport;

pub use api::{ApiError, ChatApi, MockChatApi};
pub use client::ChatClient;
pub use config::{ClientConfig, ConfigError};
pub use error::ClientError;
pub use session::{AccessToken, Session};
pub use transport::{MockTransport, Transport, TransportError, WebSocketTransport};

// Types that appear in the client API.
pub use chat_core::{
    ClientEvent, ConnectionState, Conversation, ErrorOrigin, EventKind, MarkReadRequest, Message,
    Subscription,
};

//! ChatClient - the main interface for relaychat.
//!
//! This module provides [`ChatClient`], the handle applications use to
//! drive the realtime connection and read conversation state.
//!
//! # Architecture
//!
//! `ChatClient::spawn` starts a supervisor task that owns the connection
//! state machine (from chat-core) and the transport. Handles are cheap to
//! clone; every mutation is a command to that task, every read goes to
//! shared state directly.
//!
//! ```text
//! Application → ChatClient ──command──▶ supervisor → Transport → Network
//!                    │                       ↓
//!                    └──read── Reconciler ◀──┘ chat-core (pure)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use relaychat_client::{ChatClient, ClientConfig, Session, WebSocketTransport};
//!
//! let config = ClientConfig::new("wss://chat.example.com/ws/chat/");
//! let session = Session::new("42", token);
//! let client = ChatClient::spawn(config, session, WebSocketTransport::new())?;
//!
//! let _sub = client.subscribe(EventKind::ConversationUpdated, |event| { /* re-render */ });
//! client.connect().await?;
//! client.send_message(&chat_id, "hello").await?;
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chat_core::{
    ClientEvent, ConnectionState, Conversation, EventBus, EventKind, MarkReadRequest,
    OnlineTracker, OutboundQueue, Reconciler, Subscription, TypingDebouncer,
};
use chat_types::{ChatId, ChatSummary, InboundMessage, LocalId, UserId};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::warn;

use crate::api::ChatApi;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::session::Session;
use crate::supervisor::{lock, now_std, Command, Supervisor};
use crate::transport::Transport;

/// Commands buffered between handles and the supervisor.
const COMMAND_BUFFER: usize = 64;

/// Handle to a running chat client.
///
/// Dropping the last handle shuts the supervisor down.
#[derive(Clone)]
pub struct ChatClient {
    user_id: UserId,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    bus: EventBus,
    reconciler: Arc<Mutex<Reconciler>>,
    online: Arc<Mutex<OnlineTracker>>,
    api: Option<Arc<dyn ChatApi>>,
}

impl ChatClient {
    /// Validate `config` and `session` and start the supervisor task.
    ///
    /// The client starts Disconnected; call [`connect`](Self::connect).
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<T>(config: ClientConfig, session: Session, transport: T) -> Result<Self, ClientError>
    where
        T: Transport + 'static,
    {
        config.validate()?;
        if session.user_id().as_str().is_empty() {
            return Err(ClientError::InvalidSession("empty user id".into()));
        }
        if session.token().is_empty() {
            return Err(ClientError::InvalidSession("empty access token".into()));
        }

        let user_id = session.user_id().clone();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let bus = EventBus::new();
        let reconciler = Arc::new(Mutex::new(Reconciler::new(
            user_id.clone(),
            config.reconcile_window(),
        )));
        let online = Arc::new(Mutex::new(OnlineTracker::new(config.online_window())));

        let supervisor = Supervisor {
            transport,
            endpoint: config.endpoint.clone(),
            session,
            policy: config.reconnect_policy(),
            state: ConnectionState::Disconnected,
            state_tx,
            queue: OutboundQueue::new(config.queue_capacity),
            bus: bus.clone(),
            reconciler: Arc::clone(&reconciler),
            online: Arc::clone(&online),
            typing: TypingDebouncer::new(config.typing_idle_timeout()),
            remote_typing_ttl: config.remote_typing_ttl(),
            reconnect_at: None,
            heartbeat: None,
            connect_timeout: config.connect_timeout(),
            send_timeout: config.send_timeout(),
            commands: commands_rx,
            backlog: VecDeque::new(),
        };
        tokio::spawn(supervisor.run());

        Ok(Self {
            user_id,
            commands: commands_tx,
            state: state_rx,
            bus,
            reconciler,
            online,
            api: None,
        })
    }

    /// Attach the REST collaborator used for mark-read, history and the
    /// conversation list.
    pub fn with_api(mut self, api: impl ChatApi + 'static) -> Self {
        self.api = Some(Arc::new(api));
        self
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ClientError> {
        let (reply, response) = oneshot::channel();
        self.commands.send(command(reply)).await?;
        Ok(response.await?)
    }

    fn api(&self) -> Result<&Arc<dyn ChatApi>, ClientError> {
        self.api.as_ref().ok_or(ClientError::NoApi)
    }

    // =========================================================================
    // Connection
    // =========================================================================

    /// Start connecting. Returns the state after the first attempt.
    ///
    /// A failed first attempt is not an error: the client moves to
    /// Reconnecting and retries with backoff. Only Disconnected and Failed
    /// react; in any other state this is a no-op.
    pub async fn connect(&self) -> Result<ConnectionState, ClientError> {
        self.request(|reply| Command::Connect { reply }).await
    }

    /// Close the connection and stop retrying.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Wait until the connection state satisfies `predicate`.
    pub async fn wait_for_state(
        &self,
        predicate: impl FnMut(&ConnectionState) -> bool,
    ) -> Result<ConnectionState, ClientError> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(predicate)
            .await
            .map_err(|_| ClientError::Shutdown)?;
        Ok(*reached)
    }

    /// Stop the supervisor. Typing indicators are withdrawn and the
    /// transport is closed; queued envelopes are discarded.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Register `callback` for events of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe(kind, callback)
    }

    /// Register `callback` for every event.
    pub fn subscribe_all<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.bus.subscribe_all(callback)
    }

    // =========================================================================
    // Messaging and typing
    // =========================================================================

    /// Send a text message.
    ///
    /// The message appears in the conversation immediately as Pending and
    /// is confirmed when the server echoes it. Never fails because of the
    /// connection: while offline the frame waits in the outbound queue.
    pub async fn send_message(
        &self,
        chat_id: &ChatId,
        content: impl Into<String>,
    ) -> Result<LocalId, ClientError> {
        let chat_id = chat_id.clone();
        let content = content.into();
        self.request(|reply| Command::Send {
            chat_id,
            content,
            reply,
        })
        .await
    }

    /// Record a keystroke in the composer of `chat_id`.
    pub async fn keystroke(&self, chat_id: &ChatId) -> Result<(), ClientError> {
        let chat_id = chat_id.clone();
        self.request(|reply| Command::Keystroke { chat_id, reply })
            .await
    }

    /// Withdraw the typing indicator for `chat_id` now.
    pub async fn stop_typing(&self, chat_id: &ChatId) -> Result<(), ClientError> {
        let chat_id = chat_id.clone();
        self.request(|reply| Command::StopTyping { chat_id, reply })
            .await
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    /// Open a conversation: clear its unread counter, send `message.read`
    /// for the newest peer message, and ask the REST API to mark it read.
    ///
    /// The clear becomes durable when the API call succeeds. A failing call
    /// is logged; the counter stays at zero and the next successful open
    /// acknowledges it.
    pub async fn open_conversation(&self, chat_id: &ChatId) -> Result<MarkReadRequest, ClientError> {
        let id = chat_id.clone();
        let request = self.request(|reply| Command::Open { chat_id: id, reply }).await?;
        if let Some(api) = &self.api {
            match api.mark_read(chat_id).await {
                Ok(()) => {
                    self.acknowledge_mark_read(chat_id).await?;
                }
                Err(e) => warn!(%chat_id, error = %e, "mark-read request failed"),
            }
        }
        Ok(request)
    }

    /// Leave the open conversation. Returns `true` if it was open.
    pub async fn close_conversation(&self, chat_id: &ChatId) -> Result<bool, ClientError> {
        let chat_id = chat_id.clone();
        self.request(|reply| Command::Close { chat_id, reply }).await
    }

    /// Record that the server acknowledged a mark-read.
    pub async fn acknowledge_mark_read(&self, chat_id: &ChatId) -> Result<bool, ClientError> {
        let chat_id = chat_id.clone();
        self.request(|reply| Command::MarkReadAcked { chat_id, reply })
            .await
    }

    /// Fetch the conversation list from the REST API and seed unread counts.
    pub async fn refresh_conversations(&self) -> Result<Vec<ChatSummary>, ClientError> {
        let chats = self.api()?.list_chats().await?;
        let seeded = chats.clone();
        self.request(|reply| Command::SeedChats {
            chats: seeded,
            reply,
        })
        .await?;
        Ok(chats)
    }

    /// Fetch history from the REST API and merge it. Returns how many
    /// messages changed the conversation.
    pub async fn load_history(&self, chat_id: &ChatId) -> Result<usize, ClientError> {
        let messages = self.api()?.fetch_history(chat_id).await?;
        self.apply_history(chat_id, messages).await
    }

    /// Merge already fetched history.
    pub async fn apply_history(
        &self,
        chat_id: &ChatId,
        messages: Vec<InboundMessage>,
    ) -> Result<usize, ClientError> {
        let chat_id = chat_id.clone();
        self.request(|reply| Command::LoadHistory {
            chat_id,
            messages,
            reply,
        })
        .await
    }

    /// Drop a conversation and everything in it. Returns `true` if it existed.
    pub async fn teardown_conversation(&self, chat_id: &ChatId) -> Result<bool, ClientError> {
        let chat_id = chat_id.clone();
        self.request(|reply| Command::Teardown { chat_id, reply })
            .await
    }

    /// Read-only copy of a conversation.
    pub fn snapshot(&self, chat_id: &ChatId) -> Option<Conversation> {
        lock(&self.reconciler).snapshot(chat_id)
    }

    /// Known conversations, sorted by id.
    pub fn conversation_ids(&self) -> Vec<ChatId> {
        lock(&self.reconciler).conversation_ids()
    }

    /// Unread messages across every conversation.
    pub fn total_unread(&self) -> u32 {
        lock(&self.reconciler).total_unread()
    }

    // =========================================================================
    // Presence
    // =========================================================================

    /// Whether `peer` sent any event within the online window.
    pub fn is_online(&self, peer: &UserId) -> bool {
        lock(&self.online).is_online(peer, now_std())
    }

    /// Peers currently online, sorted.
    pub fn online_peers(&self) -> Vec<UserId> {
        lock(&self.online).online(now_std())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// The logged-in user.
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Envelopes waiting for a connection.
    pub async fn queued_len(&self) -> Result<usize, ClientError> {
        self.request(|reply| Command::QueueLen { reply }).await
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .field("has_api", &self.api.is_some())
            .finish()
    }
}

//! Connection supervisor task.
//!
//! One tokio task owns the connection state machine, the outbound queue,
//! the transport, the heartbeat and reconnect timers and the typing
//! debouncer. It interprets the actions produced by
//! [`ConnectionState::on_event`] and multiplexes transport reads, timers and
//! handle commands with `tokio::select!`.
//!
//! ```text
//! ChatClient ──Command──▶ Supervisor ──frame──▶ Transport
//!                            │   ◀──frame──
//!                            ├──▶ Reconciler (Arc<Mutex>)
//!                            └──▶ EventBus ──▶ callbacks
//! ```

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chat_core::{
    Action, Applied, ClientEvent, ConnectionState, Event, EventBus, MarkReadRequest,
    OnlineTracker, OutboundQueue, Reconciler, ReconnectPolicy, TypingDebouncer,
};
use chat_types::{
    ChatId, ChatSummary, ClientCommand, InboundMessage, LocalId, OutboundEnvelope, Ping,
    ServerEvent, UserId,
};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::session::Session;
use crate::transport::{Transport, TransportError};

/// Requests from [`ChatClient`](crate::ChatClient) handles.
#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        reply: oneshot::Sender<ConnectionState>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        chat_id: ChatId,
        content: String,
        reply: oneshot::Sender<LocalId>,
    },
    Keystroke {
        chat_id: ChatId,
        reply: oneshot::Sender<()>,
    },
    StopTyping {
        chat_id: ChatId,
        reply: oneshot::Sender<()>,
    },
    Open {
        chat_id: ChatId,
        reply: oneshot::Sender<MarkReadRequest>,
    },
    Close {
        chat_id: ChatId,
        reply: oneshot::Sender<bool>,
    },
    MarkReadAcked {
        chat_id: ChatId,
        reply: oneshot::Sender<bool>,
    },
    LoadHistory {
        chat_id: ChatId,
        messages: Vec<InboundMessage>,
        reply: oneshot::Sender<usize>,
    },
    SeedChats {
        chats: Vec<ChatSummary>,
        reply: oneshot::Sender<()>,
    },
    Teardown {
        chat_id: ChatId,
        reply: oneshot::Sender<bool>,
    },
    QueueLen {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

impl Command {
    /// Commands that abandon an in-flight connection attempt.
    fn cancels_connect(&self) -> bool {
        matches!(self, Self::Disconnect { .. } | Self::Shutdown { .. })
    }
}

/// Lock a shared std mutex, recovering from poisoning.
///
/// Bus callbacks run outside every lock, so a poisoned guard only means a
/// reader panicked; the data is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Current time on the tokio clock, as a std instant for the pure core.
pub(crate) fn now_std() -> std::time::Instant {
    Instant::now().into_std()
}

/// Everything the supervisor owns.
pub(crate) struct Supervisor<T: Transport> {
    pub(crate) transport: T,
    pub(crate) endpoint: String,
    pub(crate) session: Session,
    pub(crate) policy: ReconnectPolicy,
    pub(crate) state: ConnectionState,
    pub(crate) state_tx: watch::Sender<ConnectionState>,
    pub(crate) queue: OutboundQueue,
    pub(crate) bus: EventBus,
    pub(crate) reconciler: Arc<Mutex<Reconciler>>,
    pub(crate) online: Arc<Mutex<OnlineTracker>>,
    pub(crate) typing: TypingDebouncer,
    pub(crate) remote_typing_ttl: Option<Duration>,
    pub(crate) reconnect_at: Option<Instant>,
    pub(crate) heartbeat: Option<Interval>,
    pub(crate) connect_timeout: Duration,
    pub(crate) send_timeout: Duration,
    pub(crate) commands: mpsc::Receiver<Command>,
    /// Commands that arrived while a connect was in flight.
    pub(crate) backlog: VecDeque<Command>,
}

impl<T: Transport> Supervisor<T> {
    /// Run until shut down or every handle is dropped.
    pub(crate) async fn run(mut self) {
        info!(user_id = %self.session.user_id(), endpoint = %self.endpoint, "supervisor started");
        loop {
            if let Some(command) = self.backlog.pop_front() {
                if self.on_command(Some(command)).await.is_break() {
                    break;
                }
                continue;
            }

            let reconnect_at = self.reconnect_at;
            let presence_at = self.presence_deadline();
            let connected = self.state.is_connected();

            tokio::select! {
                command = self.commands.recv() => {
                    if self.on_command(command).await.is_break() {
                        break;
                    }
                }
                frame = self.transport.recv(), if connected => self.handle_frame(frame).await,
                () = sleep_until_opt(reconnect_at) => {
                    self.reconnect_at = None;
                    self.apply(Event::ReconnectTimerFired).await;
                }
                () = tick(&mut self.heartbeat) => self.apply(Event::HeartbeatDue).await,
                () = sleep_until_opt(presence_at) => self.expire_presence().await,
            }
        }
        info!("supervisor stopped");
    }

    /// Handle one command; `Break` once the supervisor should stop.
    async fn on_command(&mut self, command: Option<Command>) -> ControlFlow<()> {
        match command {
            Some(Command::Shutdown { reply }) => {
                self.shutdown().await;
                let _ = reply.send(());
                ControlFlow::Break(())
            }
            Some(command) => {
                self.handle_command(command).await;
                ControlFlow::Continue(())
            }
            None => {
                debug!("all client handles dropped");
                self.shutdown().await;
                ControlFlow::Break(())
            }
        }
    }

    // =========================================================================
    // State machine
    // =========================================================================

    /// Feed an event to the state machine and execute the resulting actions.
    ///
    /// Actions that fail produce follow-up events, processed in order after
    /// the current batch.
    async fn apply(&mut self, event: Event) {
        let mut events = VecDeque::from([event]);
        while let Some(event) = events.pop_front() {
            let previous = self.state;
            let (next, actions) = previous.on_event(event, &self.policy);
            self.state = next;
            if next != previous {
                info!(from = previous.name(), to = next.name(), ?next, "connection state changed");
                self.state_tx.send_replace(next);
            }
            for action in actions {
                if let Some(follow_up) = self.execute(action).await {
                    events.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::Connect => match self.connect().await {
                Some(Ok(())) => Some(Event::ConnectSucceeded),
                Some(Err(e)) => {
                    warn!(error = %e, "connect failed");
                    Some(Event::ConnectFailed {
                        error: e.to_string(),
                    })
                }
                None => {
                    info!("connect attempt cancelled");
                    Some(Event::DisconnectRequested)
                }
            },
            Action::Close => {
                self.transport.close().await;
                None
            }
            Action::StartHeartbeat { interval } => {
                let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
                heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.heartbeat = Some(heartbeat);
                None
            }
            Action::StopHeartbeat => {
                self.heartbeat = None;
                None
            }
            Action::SendPing => {
                let ping = OutboundEnvelope::new(ClientCommand::Ping(Ping {}));
                self.transmit(&ping)
                    .await
                    .err()
                    .map(|e| Event::ConnectionLost {
                        reason: e.to_string(),
                    })
            }
            Action::FlushQueue => self.flush().await,
            Action::StartReconnectTimer { delay } => {
                debug!(?delay, "reconnect scheduled");
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            Action::CancelReconnect => {
                self.reconnect_at = None;
                None
            }
            Action::Emit(event) => {
                self.bus.publish(&ClientEvent::from(event));
                None
            }
        }
    }

    /// One bounded connection attempt, raced against the command channel.
    ///
    /// Commands that arrive meanwhile go to the backlog. A disconnect,
    /// shutdown or closed channel abandons the attempt and yields `None`.
    async fn connect(&mut self) -> Option<Result<(), TransportError>> {
        let attempt = tokio::time::timeout(
            self.connect_timeout,
            self.transport
                .connect(&self.endpoint, self.session.token().expose()),
        );
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    break Some(result.unwrap_or(Err(TransportError::Timeout("connect"))));
                }
                command = self.commands.recv() => match command {
                    Some(command) => {
                        let cancels = command.cancels_connect();
                        self.backlog.push_back(command);
                        if cancels {
                            break None;
                        }
                    }
                    None => break None,
                },
            }
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    async fn transmit(&self, envelope: &OutboundEnvelope) -> Result<(), TransportError> {
        let frame = match envelope.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(kind = envelope.kind(), error = %e, "dropping unencodable envelope");
                return Ok(());
            }
        };
        debug!(kind = envelope.kind(), request_id = %envelope.correlation_id(), "sending frame");
        tokio::time::timeout(self.send_timeout, self.transport.send(&frame))
            .await
            .unwrap_or(Err(TransportError::Timeout("send")))
    }

    /// Drain the queue oldest first. A failed send goes back to the head.
    async fn flush(&mut self) -> Option<Event> {
        if !self.queue.is_empty() {
            info!(queued = self.queue.len(), "flushing outbound queue");
        }
        while let Some(envelope) = self.queue.pop_front() {
            if let Err(e) = self.transmit(&envelope).await {
                warn!(kind = envelope.kind(), error = %e, "send failed during flush");
                self.queue.requeue_front(envelope);
                return Some(Event::ConnectionLost {
                    reason: e.to_string(),
                });
            }
        }
        None
    }

    /// Send now if connected with nothing queued ahead, otherwise queue.
    async fn dispatch(&mut self, envelope: OutboundEnvelope) {
        if !(self.state.is_connected() && self.queue.is_empty()) {
            self.enqueue(envelope);
            return;
        }
        if let Err(e) = self.transmit(&envelope).await {
            warn!(kind = envelope.kind(), error = %e, "send failed");
            self.queue.requeue_front(envelope);
            self.apply(Event::ConnectionLost {
                reason: e.to_string(),
            })
            .await;
        }
    }

    fn enqueue(&mut self, envelope: OutboundEnvelope) {
        debug!(kind = envelope.kind(), state = self.state.name(), "queued while offline");
        if let Some(dropped) = self.queue.push(envelope) {
            warn!(
                kind = dropped.kind(),
                request_id = %dropped.correlation_id(),
                capacity = self.queue.capacity(),
                "outbound queue full, dropped oldest envelope"
            );
        }
    }

    async fn dispatch_command(&mut self, command: ClientCommand) {
        self.dispatch(OutboundEnvelope::new(command)).await;
    }

    // =========================================================================
    // Commands
    // =========================================================================

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { reply } => {
                if matches!(
                    self.state,
                    ConnectionState::Disconnected | ConnectionState::Failed
                ) {
                    self.apply(Event::ConnectRequested).await;
                }
                let _ = reply.send(self.state);
            }
            Command::Disconnect { reply } => {
                self.stop_all_typing().await;
                self.apply(Event::DisconnectRequested).await;
                let _ = reply.send(());
            }
            Command::Send {
                chat_id,
                content,
                reply,
            } => {
                let (local_id, envelope) = lock(&self.reconciler).compose(&chat_id, content, Utc::now());
                debug!(%chat_id, %local_id, "composed optimistic message");
                self.publish_updated(chat_id.clone());
                self.dispatch(envelope).await;
                if let Some(stop) = self.typing.cancel(&chat_id) {
                    self.dispatch_command(stop).await;
                }
                let _ = reply.send(local_id);
            }
            Command::Keystroke { chat_id, reply } => {
                if let Some(start) = self.typing.keystroke(&chat_id, now_std()) {
                    self.dispatch_command(start).await;
                }
                let _ = reply.send(());
            }
            Command::StopTyping { chat_id, reply } => {
                if let Some(stop) = self.typing.cancel(&chat_id) {
                    self.dispatch_command(stop).await;
                }
                let _ = reply.send(());
            }
            Command::Open { chat_id, reply } => {
                let request = lock(&self.reconciler).open(&chat_id);
                if let Some(read) = request.to_command() {
                    self.dispatch_command(read).await;
                }
                self.publish_updated(chat_id);
                let _ = reply.send(request);
            }
            Command::Close { chat_id, reply } => {
                let _ = reply.send(lock(&self.reconciler).close_conversation(&chat_id));
            }
            Command::MarkReadAcked { chat_id, reply } => {
                let known = lock(&self.reconciler).apply_mark_read_ack(&chat_id);
                if known {
                    self.publish_updated(chat_id);
                }
                let _ = reply.send(known);
            }
            Command::LoadHistory {
                chat_id,
                messages,
                reply,
            } => {
                let fetched = messages.len();
                let changed = lock(&self.reconciler).load_history(&chat_id, messages);
                debug!(%chat_id, fetched, changed, "history merged");
                if changed > 0 {
                    self.publish_updated(chat_id);
                }
                let _ = reply.send(changed);
            }
            Command::SeedChats { chats, reply } => {
                for chat in &chats {
                    lock(&self.reconciler).apply_chat_summary(chat);
                }
                for chat in chats {
                    self.publish_updated(chat.id);
                }
                let _ = reply.send(());
            }
            Command::Teardown { chat_id, reply } => {
                if let Some(stop) = self.typing.cancel(&chat_id) {
                    self.dispatch_command(stop).await;
                }
                let removed = lock(&self.reconciler).teardown(&chat_id).is_some();
                debug!(%chat_id, removed, "conversation torn down");
                let _ = reply.send(removed);
            }
            Command::QueueLen { reply } => {
                let _ = reply.send(self.queue.len());
            }
            // Handled by the run loop.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Announce `typing.stop` for every outstanding start. Only worth sending
    /// on a live connection; otherwise the deadlines are just dropped.
    async fn stop_all_typing(&mut self) {
        let stops = self.typing.cancel_all();
        if self.state.is_connected() {
            for stop in stops {
                self.dispatch_command(stop).await;
            }
        }
    }

    async fn shutdown(&mut self) {
        self.stop_all_typing().await;
        self.apply(Event::DisconnectRequested).await;
        self.reconnect_at = None;
        self.heartbeat = None;
        if !self.queue.is_empty() {
            warn!(queued = self.queue.len(), "discarding unsent envelopes on shutdown");
        }
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    async fn handle_frame(&mut self, frame: Result<String, TransportError>) {
        match frame {
            Ok(text) => self.handle_text(&text),
            Err(e) => {
                warn!(error = %e, "connection lost");
                self.apply(Event::ConnectionLost {
                    reason: e.to_string(),
                })
                .await;
            }
        }
    }

    fn handle_text(&mut self, text: &str) {
        let event = match ServerEvent::decode(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed frame");
                return;
            }
        };

        let now = now_std();
        let updated = match &event {
            ServerEvent::MessageNew(message) => {
                self.peer_seen(&message.sender_id, now);
                let applied = lock(&self.reconciler).apply_message(message);
                match &applied {
                    Applied::Reconciled { local_id } => {
                        debug!(message_id = %message.message_id, %local_id, "confirmed optimistic message")
                    }
                    Applied::Duplicate => {
                        debug!(message_id = %message.message_id, "duplicate message ignored")
                    }
                    Applied::Inserted { counted_unread } => {
                        debug!(message_id = %message.message_id, counted_unread, "message inserted")
                    }
                }
                applied.changed().then(|| message.chat_id.clone())
            }
            ServerEvent::MessageRead(receipt) => lock(&self.reconciler).apply_read_receipt(receipt),
            ServerEvent::TypingStart(notice) => {
                self.peer_seen(&notice.user_id, now);
                lock(&self.reconciler)
                    .peer_typing(notice, now)
                    .then(|| notice.chat_id.clone())
            }
            ServerEvent::TypingStop(notice) => {
                self.peer_seen(&notice.user_id, now);
                lock(&self.reconciler)
                    .peer_stopped_typing(notice)
                    .then(|| notice.chat_id.clone())
            }
            ServerEvent::ChatNew(summary) => {
                let created = lock(&self.reconciler).apply_chat_summary(summary);
                info!(chat_id = %summary.id, created, "added to conversation");
                Some(summary.id.clone())
            }
            ServerEvent::Error(error) => {
                warn!(message = %error.message, "server reported an error");
                None
            }
            ServerEvent::Pong => {
                debug!("pong");
                None
            }
        };

        if let Some(event) = ClientEvent::from_server(event) {
            self.bus.publish(&event);
        }
        if let Some(chat_id) = updated {
            self.publish_updated(chat_id);
        }
    }

    fn peer_seen(&self, peer: &UserId, now: std::time::Instant) {
        if peer != self.session.user_id() {
            lock(&self.online).seen(peer, now);
        }
    }

    fn publish_updated(&self, chat_id: ChatId) {
        self.bus.publish(&ClientEvent::ConversationUpdated { chat_id });
    }

    // =========================================================================
    // Presence timers
    // =========================================================================

    /// Earliest of the local typing deadline and the remote typing expiry.
    fn presence_deadline(&self) -> Option<Instant> {
        let local = self.typing.next_deadline();
        let remote = self
            .remote_typing_ttl
            .and_then(|ttl| lock(&self.reconciler).next_typing_expiry(ttl));
        local.into_iter().chain(remote).min().map(Instant::from_std)
    }

    async fn expire_presence(&mut self) {
        let now = now_std();
        for stop in self.typing.expire(now) {
            self.dispatch_command(stop).await;
        }
        if let Some(ttl) = self.remote_typing_ttl {
            let stale = lock(&self.reconciler).prune_typing(now, ttl);
            for chat_id in stale {
                debug!(%chat_id, "remote typing indicator expired");
                self.publish_updated(chat_id);
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

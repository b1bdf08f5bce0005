//! Conversation reconciler.
//!
//! Merges optimistic local messages with server-confirmed ones, deduplicates
//! repeated deliveries, keeps messages ordered, and tracks unread counts,
//! read receipts and remote typing. Pure: time is passed in by the caller.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chat_types::{
    ChatId, ChatSummary, ClientCommand, InboundMessage, LocalId, MarkRead, MessageBody,
    MessageId, MessageKind, OutboundEnvelope, ReadReceipt, TypingNotice, UserId,
};
use chrono::{DateTime, Utc};

use crate::conversation::{Conversation, Message};

/// Default window for matching a confirmation to an optimistic message.
pub const DEFAULT_RECONCILE_WINDOW: Duration = Duration::from_secs(5);

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Replaced the optimistic message with this local id, in place.
    Reconciled {
        /// The optimistic message's id.
        local_id: LocalId,
    },
    /// Already present; discarded.
    Duplicate,
    /// Inserted as a new message.
    Inserted {
        /// Whether the conversation's unread counter went up.
        counted_unread: bool,
    },
}

impl Applied {
    /// Whether the conversation changed.
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Duplicate)
    }
}

/// Request to mark a conversation read, produced by [`Reconciler::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkReadRequest {
    /// The conversation.
    pub chat_id: ChatId,
    /// Newest confirmed peer message, if any is loaded.
    pub up_to: Option<MessageId>,
}

impl MarkReadRequest {
    /// The wire `message.read` command, when there is a message to name.
    pub fn to_command(&self) -> Option<ClientCommand> {
        self.up_to.as_ref().map(|message_id| {
            ClientCommand::MarkRead(MarkRead {
                chat_id: self.chat_id.clone(),
                message_id: message_id.clone(),
            })
        })
    }
}

/// Owner of all conversation state.
#[derive(Debug, Clone)]
pub struct Reconciler {
    self_id: UserId,
    window: Duration,
    conversations: HashMap<ChatId, Conversation>,
    open: Option<ChatId>,
}

impl Reconciler {
    /// Create a reconciler for the user `self_id`.
    pub fn new(self_id: UserId, window: Duration) -> Self {
        Self {
            self_id,
            window,
            conversations: HashMap::new(),
            open: None,
        }
    }

    /// The local user.
    pub fn self_id(&self) -> &UserId {
        &self.self_id
    }

    /// The reconciliation window.
    pub fn window(&self) -> Duration {
        self.window
    }

    fn conversation_mut(&mut self, chat_id: &ChatId) -> &mut Conversation {
        self.conversations
            .entry(chat_id.clone())
            .or_insert_with(|| Conversation::new(chat_id.clone()))
    }

    // =========================================================================
    // Local compose
    // =========================================================================

    /// Append an optimistic message and build the `message.send` envelope.
    pub fn compose(
        &mut self,
        chat_id: &ChatId,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> (LocalId, OutboundEnvelope) {
        let content = content.into();
        let message = Message::pending(chat_id.clone(), self.self_id.clone(), content.clone(), now);
        let local_id = message.local_id.unwrap_or_default();
        self.conversation_mut(chat_id).push_pending(message);
        let envelope =
            OutboundEnvelope::new(ClientCommand::send_text(chat_id.clone(), content, local_id));
        (local_id, envelope)
    }

    // =========================================================================
    // Inbound messages
    // =========================================================================

    /// Apply a pushed `message.new`.
    pub fn apply_message(&mut self, inbound: &InboundMessage) -> Applied {
        self.merge(inbound, true)
    }

    /// Merge fetched history. Idempotent by server id; never counts unread.
    ///
    /// Returns how many messages changed the conversation.
    pub fn load_history<I>(&mut self, chat_id: &ChatId, history: I) -> usize
    where
        I: IntoIterator<Item = InboundMessage>,
    {
        self.conversation_mut(chat_id);
        history
            .into_iter()
            .filter(|m| self.merge(m, false).changed())
            .count()
    }

    fn merge(&mut self, inbound: &InboundMessage, count_unread: bool) -> Applied {
        let self_id = self.self_id.clone();
        let window = self.window;
        let is_open = self.open.as_ref() == Some(&inbound.chat_id);
        let conversation = self.conversation_mut(&inbound.chat_id);

        if conversation.contains_server_id(&inbound.message_id) {
            tracing::debug!(message_id = %inbound.message_id, "duplicate delivery discarded");
            return Applied::Duplicate;
        }

        let pending = match inbound.client_id {
            Some(local_id) => conversation.pending_mut_by_local_id(&local_id),
            None if inbound.sender_id == self_id => {
                conversation.pending_mut_where(|local| heuristic_match(local, inbound, window))
            }
            None => None,
        };
        if let Some(local) = pending {
            local.confirm(inbound);
            let local_id = local.local_id.unwrap_or_default();
            return Applied::Reconciled { local_id };
        }

        conversation.insert_ordered(Message::confirmed(inbound));
        let counted_unread = count_unread && inbound.sender_id != self_id && !is_open;
        if counted_unread {
            conversation.increment_unread();
        }
        Applied::Inserted { counted_unread }
    }

    /// Apply an inbound `message.read` receipt.
    ///
    /// Returns the conversation containing the message, or `None` if the id
    /// is unknown.
    pub fn apply_read_receipt(&mut self, receipt: &ReadReceipt) -> Option<ChatId> {
        for conversation in self.conversations.values_mut() {
            if let Some(message) = conversation.message_mut_by_server_id(&receipt.message_id) {
                message.status = message.status.max(chat_types::DeliveryStatus::Read);
                return Some(conversation.id().clone());
            }
        }
        tracing::debug!(message_id = %receipt.message_id, "read receipt for unknown message");
        None
    }

    // =========================================================================
    // Conversation list
    // =========================================================================

    /// Register a conversation announced by `chat.new` or the conversation
    /// list. Returns `true` if it was not known before.
    pub fn apply_chat_summary(&mut self, summary: &ChatSummary) -> bool {
        let known = self.conversations.contains_key(&summary.id);
        self.seed_unread(&summary.id, summary.unread_count);
        !known
    }

    /// Apply the server's unread count for a conversation.
    ///
    /// Ignored for the open conversation and while a local clear awaits
    /// acknowledgement. Returns `true` if the counter changed.
    pub fn seed_unread(&mut self, chat_id: &ChatId, count: u32) -> bool {
        let is_open = self.open.as_ref() == Some(chat_id);
        let conversation = self.conversation_mut(chat_id);
        !is_open && conversation.seed_unread(count)
    }

    // =========================================================================
    // Read state
    // =========================================================================

    /// Make `chat_id` the open conversation and clear its unread counter
    /// locally. The returned request should be sent to the server; the
    /// clear becomes durable on [`apply_mark_read_ack`](Self::apply_mark_read_ack).
    pub fn open(&mut self, chat_id: &ChatId) -> MarkReadRequest {
        self.open = Some(chat_id.clone());
        let self_id = self.self_id.clone();
        let conversation = self.conversation_mut(chat_id);
        conversation.clear_unread_locally();
        MarkReadRequest {
            chat_id: chat_id.clone(),
            up_to: conversation
                .newest_peer_message(&self_id)
                .and_then(|m| m.server_id.clone()),
        }
    }

    /// Leave the open conversation. Returns `true` if it was open.
    pub fn close_conversation(&mut self, chat_id: &ChatId) -> bool {
        if self.open.as_ref() == Some(chat_id) {
            self.open = None;
            true
        } else {
            false
        }
    }

    /// The server acknowledged a mark-read. Returns `true` if the
    /// conversation is known.
    pub fn apply_mark_read_ack(&mut self, chat_id: &ChatId) -> bool {
        match self.conversations.get_mut(chat_id) {
            Some(conversation) => {
                conversation.acknowledge_read();
                true
            }
            None => false,
        }
    }

    /// The open conversation, if any.
    pub fn open_conversation(&self) -> Option<&ChatId> {
        self.open.as_ref()
    }

    // =========================================================================
    // Remote typing
    // =========================================================================

    /// A peer started typing. Returns `true` if they were not already typing.
    pub fn peer_typing(&mut self, notice: &TypingNotice, now: Instant) -> bool {
        if notice.user_id == self.self_id {
            return false;
        }
        self.conversation_mut(&notice.chat_id)
            .peer_typing(notice.user_id.clone(), now)
    }

    /// A peer stopped typing. Returns `true` if they were typing.
    pub fn peer_stopped_typing(&mut self, notice: &TypingNotice) -> bool {
        self.conversations
            .get_mut(&notice.chat_id)
            .is_some_and(|c| c.peer_stopped_typing(&notice.user_id))
    }

    /// Drop typing peers older than `ttl`. Returns the conversations that
    /// changed.
    pub fn prune_typing(&mut self, now: Instant, ttl: Duration) -> Vec<ChatId> {
        self.conversations
            .values_mut()
            .filter_map(|c| c.prune_typing(now, ttl).then(|| c.id().clone()))
            .collect()
    }

    /// Earliest instant at which a typing peer goes stale.
    pub fn next_typing_expiry(&self, ttl: Duration) -> Option<Instant> {
        self.conversations
            .values()
            .filter_map(|c| c.next_typing_expiry(ttl))
            .min()
    }

    // =========================================================================
    // Views and teardown
    // =========================================================================

    /// Cloned, read-only view of a conversation.
    pub fn snapshot(&self, chat_id: &ChatId) -> Option<Conversation> {
        self.conversations.get(chat_id).cloned()
    }

    /// Known conversation ids, sorted.
    pub fn conversation_ids(&self) -> Vec<ChatId> {
        let mut ids: Vec<_> = self.conversations.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Sum of unread counters.
    pub fn total_unread(&self) -> u32 {
        self.conversations
            .values()
            .fold(0u32, |acc, c| acc.saturating_add(c.unread_count()))
    }

    /// Remove a conversation and everything in it.
    pub fn teardown(&mut self, chat_id: &ChatId) -> Option<Conversation> {
        self.close_conversation(chat_id);
        self.conversations.remove(chat_id)
    }
}

/// Same conversation and sender, equal text, timestamps within the window.
fn heuristic_match(local: &Message, inbound: &InboundMessage, window: Duration) -> bool {
    let MessageBody::Text(content) = &local.body else {
        return false;
    };
    let skew_ms = (inbound.timestamp - local.created_at)
        .num_milliseconds()
        .unsigned_abs();
    local.chat_id == inbound.chat_id
        && local.sender_id == inbound.sender_id
        && inbound.message_type == MessageKind::Text
        && inbound.content.as_deref() == Some(content.as_str())
        && u128::from(skew_ms) < window.as_millis()
}

//! Per-conversation state: ordered messages, unread counter, typing peers.
//!
//! A [`Conversation`] is owned by the [`Reconciler`](crate::Reconciler); the
//! UI only ever sees cloned snapshots.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chat_types::{
    ChatId, DeliveryStatus, InboundMessage, LocalId, MessageBody, MessageId, UserId,
};
use chrono::{DateTime, Utc};

/// A message as the UI sees it.
///
/// Either pending-local (`server_id` unset) or confirmed (`server_id` set).
/// A reconciled message keeps its `local_id` so UI keys stay stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned id, once confirmed.
    pub server_id: Option<MessageId>,
    /// Client-generated id, for locally composed messages.
    pub local_id: Option<LocalId>,
    /// Conversation the message belongs to.
    pub chat_id: ChatId,
    /// Author.
    pub sender_id: UserId,
    /// Content.
    pub body: MessageBody,
    /// Ordering key. Local clock for composed messages, server clock for
    /// messages first seen from the server. Never changes after insertion.
    pub created_at: DateTime<Utc>,
    /// Server timestamp, once confirmed.
    pub confirmed_at: Option<DateTime<Utc>>,
    /// Delivery status.
    pub status: DeliveryStatus,
}

impl Message {
    /// An optimistic, locally composed text message.
    pub fn pending(
        chat_id: ChatId,
        sender_id: UserId,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            server_id: None,
            local_id: Some(LocalId::new()),
            chat_id,
            sender_id,
            body: MessageBody::Text(content.into()),
            created_at,
            confirmed_at: None,
            status: DeliveryStatus::Pending,
        }
    }

    /// A confirmed message built from a server record.
    pub fn confirmed(inbound: &InboundMessage) -> Self {
        Self {
            server_id: Some(inbound.message_id.clone()),
            local_id: None,
            chat_id: inbound.chat_id.clone(),
            sender_id: inbound.sender_id.clone(),
            body: inbound.body(),
            created_at: inbound.timestamp,
            confirmed_at: Some(inbound.timestamp),
            status: confirmed_status(inbound.status),
        }
    }

    /// True until the server confirms this message.
    pub fn is_pending(&self) -> bool {
        self.server_id.is_none()
    }

    /// Overwrite this pending record with its confirmed counterpart. The
    /// ordering key stays local so the record keeps its position.
    pub(crate) fn confirm(&mut self, inbound: &InboundMessage) {
        self.server_id = Some(inbound.message_id.clone());
        self.body = inbound.body();
        self.confirmed_at = Some(inbound.timestamp);
        self.status = confirmed_status(inbound.status);
    }
}

/// A server record can never be pending.
fn confirmed_status(status: DeliveryStatus) -> DeliveryStatus {
    status.max(DeliveryStatus::Sent)
}

/// State of a single conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    id: ChatId,
    unread_count: u32,
    mark_read_pending: bool,
    messages: Vec<Message>,
    typing_peers: BTreeMap<UserId, Instant>,
}

impl Conversation {
    /// An empty conversation.
    pub fn new(id: ChatId) -> Self {
        Self {
            id,
            unread_count: 0,
            mark_read_pending: false,
            messages: Vec::new(),
            typing_peers: BTreeMap::new(),
        }
    }

    /// Conversation id.
    pub fn id(&self) -> &ChatId {
        &self.id
    }

    /// Unread messages from peers.
    pub fn unread_count(&self) -> u32 {
        self.unread_count
    }

    /// True between a local mark-read and the server's acknowledgement.
    pub fn is_mark_read_pending(&self) -> bool {
        self.mark_read_pending
    }

    /// Messages ordered by creation time, ties in arrival order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Peers currently typing, in id order.
    pub fn typing_peers(&self) -> impl Iterator<Item = &UserId> {
        self.typing_peers.keys()
    }

    /// Whether `peer` is typing.
    pub fn is_typing(&self, peer: &UserId) -> bool {
        self.typing_peers.contains_key(peer)
    }

    /// Look up a message by server id.
    pub fn find_by_server_id(&self, id: &MessageId) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.server_id.as_ref() == Some(id))
    }

    /// Look up a message by local id.
    pub fn find_by_local_id(&self, id: &LocalId) -> Option<&Message> {
        self.messages.iter().find(|m| m.local_id.as_ref() == Some(id))
    }

    /// Newest confirmed message not sent by `self_id`.
    pub fn newest_peer_message(&self, self_id: &UserId) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.server_id.is_some() && &m.sender_id != self_id)
    }

    /// Append at the tail. A local clock behind the newest message is
    /// clamped to it so the list stays sorted.
    pub(crate) fn push_pending(&mut self, mut message: Message) {
        if let Some(last) = self.messages.last() {
            message.created_at = message.created_at.max(last.created_at);
        }
        self.messages.push(message);
    }

    /// Insert after every message with an equal or earlier timestamp.
    pub(crate) fn insert_ordered(&mut self, message: Message) {
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
    }

    pub(crate) fn contains_server_id(&self, id: &MessageId) -> bool {
        self.find_by_server_id(id).is_some()
    }

    pub(crate) fn message_mut_by_server_id(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.server_id.as_ref() == Some(id))
    }

    pub(crate) fn pending_mut_by_local_id(&mut self, id: &LocalId) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.is_pending() && m.local_id.as_ref() == Some(id))
    }

    /// Oldest pending message matching `pred`.
    pub(crate) fn pending_mut_where(
        &mut self,
        pred: impl Fn(&Message) -> bool,
    ) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|m| m.is_pending() && pred(m))
    }

    pub(crate) fn increment_unread(&mut self) {
        self.unread_count = self.unread_count.saturating_add(1);
    }

    pub(crate) fn clear_unread_locally(&mut self) {
        self.unread_count = 0;
        self.mark_read_pending = true;
    }

    pub(crate) fn acknowledge_read(&mut self) {
        self.unread_count = 0;
        self.mark_read_pending = false;
    }

    /// Server counts are ignored while a local clear is unacknowledged.
    pub(crate) fn seed_unread(&mut self, count: u32) -> bool {
        if self.mark_read_pending || self.unread_count == count {
            return false;
        }
        self.unread_count = count;
        true
    }

    pub(crate) fn peer_typing(&mut self, peer: UserId, now: Instant) -> bool {
        self.typing_peers.insert(peer, now).is_none()
    }

    pub(crate) fn peer_stopped_typing(&mut self, peer: &UserId) -> bool {
        self.typing_peers.remove(peer).is_some()
    }

    /// Drop peers whose last `typing.start` is older than `ttl`.
    pub(crate) fn prune_typing(&mut self, now: Instant, ttl: Duration) -> bool {
        let before = self.typing_peers.len();
        self.typing_peers
            .retain(|_, started| now.saturating_duration_since(*started) < ttl);
        self.typing_peers.len() != before
    }

    /// Earliest instant at which a typing peer goes stale.
    pub(crate) fn next_typing_expiry(&self, ttl: Duration) -> Option<Instant> {
        self.typing_peers.values().map(|started| *started + ttl).min()
    }
}

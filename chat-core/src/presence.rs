//! Presence: local typing debounce and peer online tracking.
//!
//! Remote typing indicators live on the [`Conversation`](crate::Conversation)
//! and are written by the [`Reconciler`](crate::Reconciler).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chat_types::{ChatId, ChatRef, ClientCommand, UserId};

/// Default idle time after the last keystroke before `typing.stop`.
pub const DEFAULT_TYPING_IDLE: Duration = Duration::from_secs(2);

/// Default window during which a peer counts as online after any event.
pub const DEFAULT_ONLINE_WINDOW: Duration = Duration::from_secs(60);

/// Debounces local keystrokes into `typing.start` / `typing.stop` commands.
///
/// At most one idle deadline exists per conversation. The caller arms a
/// timer for [`next_deadline`](Self::next_deadline) and calls
/// [`expire`](Self::expire) when it fires.
#[derive(Debug, Clone)]
pub struct TypingDebouncer {
    idle_timeout: Duration,
    deadlines: HashMap<ChatId, Instant>,
}

impl TypingDebouncer {
    /// Create a debouncer with the given idle timeout.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            deadlines: HashMap::new(),
        }
    }

    /// Record a keystroke. Returns `typing.start` if none is outstanding.
    pub fn keystroke(&mut self, chat_id: &ChatId, now: Instant) -> Option<ClientCommand> {
        let deadline = now + self.idle_timeout;
        match self.deadlines.insert(chat_id.clone(), deadline) {
            Some(_) => None,
            None => Some(ClientCommand::TypingStart(ChatRef {
                chat_id: chat_id.clone(),
            })),
        }
    }

    /// Emit `typing.stop` for every deadline that has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<ClientCommand> {
        let mut due: Vec<ChatId> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(chat_id, _)| chat_id.clone())
            .collect();
        due.sort();
        due.into_iter()
            .map(|chat_id| {
                self.deadlines.remove(&chat_id);
                ClientCommand::TypingStop(ChatRef { chat_id })
            })
            .collect()
    }

    /// Cancel the deadline for a conversation (message sent, teardown).
    ///
    /// Returns `typing.stop` if a `typing.start` was outstanding.
    pub fn cancel(&mut self, chat_id: &ChatId) -> Option<ClientCommand> {
        self.deadlines.remove(chat_id).map(|_| {
            ClientCommand::TypingStop(ChatRef {
                chat_id: chat_id.clone(),
            })
        })
    }

    /// Cancel every outstanding deadline.
    pub fn cancel_all(&mut self) -> Vec<ClientCommand> {
        let mut chats: Vec<ChatId> = self.deadlines.drain().map(|(c, _)| c).collect();
        chats.sort();
        chats
            .into_iter()
            .map(|chat_id| ClientCommand::TypingStop(ChatRef { chat_id }))
            .collect()
    }

    /// Earliest outstanding deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Whether a `typing.start` is outstanding for a conversation.
    pub fn is_typing(&self, chat_id: &ChatId) -> bool {
        self.deadlines.contains_key(chat_id)
    }
}

impl Default for TypingDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_IDLE)
    }
}

/// Last-seen tracking for peers.
#[derive(Debug, Clone)]
pub struct OnlineTracker {
    window: Duration,
    last_seen: HashMap<UserId, Instant>,
}

impl OnlineTracker {
    /// Create a tracker with the given online window.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: HashMap::new(),
        }
    }

    /// Record activity from `peer`.
    pub fn seen(&mut self, peer: &UserId, now: Instant) {
        self.last_seen.insert(peer.clone(), now);
    }

    /// When `peer` was last seen.
    pub fn last_seen(&self, peer: &UserId) -> Option<Instant> {
        self.last_seen.get(peer).copied()
    }

    /// Whether `peer` was seen within the window.
    pub fn is_online(&self, peer: &UserId, now: Instant) -> bool {
        self.last_seen
            .get(peer)
            .is_some_and(|seen| now.saturating_duration_since(*seen) < self.window)
    }

    /// Peers currently online, sorted.
    pub fn online(&self, now: Instant) -> Vec<UserId> {
        let mut peers: Vec<UserId> = self
            .last_seen
            .keys()
            .filter(|peer| self.is_online(peer, now))
            .cloned()
            .collect();
        peers.sort();
        peers
    }
}

impl Default for OnlineTracker {
    fn default() -> Self {
        Self::new(DEFAULT_ONLINE_WINDOW)
    }
}

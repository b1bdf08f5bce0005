//! Events delivered to subscribers.
//!
//! A [`ClientEvent`] is either a decoded server push, a connection lifecycle
//! transition synthesized by the supervisor, or a local notification that a
//! conversation's state changed.

use std::fmt;
use std::time::Duration;

use chat_types::{ChatId, ChatSummary, InboundMessage, ReadReceipt, ServerEvent, TypingNotice};

use crate::state::LifecycleEvent;

/// Subscription key: the event-kind a callback listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// `message.new`
    MessageNew,
    /// `message.read`
    MessageRead,
    /// `typing.start`
    TypingStart,
    /// `typing.stop`
    TypingStop,
    /// `chat.new`
    ChatNew,
    /// `error`
    Error,
    /// `connected`
    Connected,
    /// `disconnected`
    Disconnected,
    /// `reconnecting`
    Reconnecting,
    /// `max_reconnect_reached`
    MaxReconnectReached,
    /// `conversation.updated`
    ConversationUpdated,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [EventKind; 11] = [
        Self::MessageNew,
        Self::MessageRead,
        Self::TypingStart,
        Self::TypingStop,
        Self::ChatNew,
        Self::Error,
        Self::Connected,
        Self::Disconnected,
        Self::Reconnecting,
        Self::MaxReconnectReached,
        Self::ConversationUpdated,
    ];

    /// The event-kind string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageNew => "message.new",
            Self::MessageRead => "message.read",
            Self::TypingStart => "typing.start",
            Self::TypingStop => "typing.stop",
            Self::ChatNew => "chat.new",
            Self::Error => "error",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::MaxReconnectReached => "max_reconnect_reached",
            Self::ConversationUpdated => "conversation.updated",
        }
    }

    /// Parse an event-kind string.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an `error` event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// The server rejected a command.
    Server,
    /// A connection attempt failed.
    Connection,
}

/// An event published on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A message arrived.
    MessageNew(InboundMessage),
    /// One of our messages was read.
    MessageRead(ReadReceipt),
    /// A peer started typing.
    TypingStart(TypingNotice),
    /// A peer stopped typing.
    TypingStop(TypingNotice),
    /// We were added to a conversation.
    ChatNew(ChatSummary),
    /// Server or connection error.
    Error {
        /// Where the error came from.
        origin: ErrorOrigin,
        /// Human-readable reason.
        message: String,
    },
    /// The connection is open.
    Connected,
    /// The connection closed.
    Disconnected {
        /// Why.
        reason: String,
    },
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// Attempt number (1-based).
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Reconnect attempts exhausted.
    MaxReconnectReached {
        /// Attempts made.
        attempts: u32,
    },
    /// A conversation's reconciled state changed; take a new snapshot.
    ConversationUpdated {
        /// The conversation.
        chat_id: ChatId,
    },
}

impl ClientEvent {
    /// The subscription key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::MessageNew(_) => EventKind::MessageNew,
            Self::MessageRead(_) => EventKind::MessageRead,
            Self::TypingStart(_) => EventKind::TypingStart,
            Self::TypingStop(_) => EventKind::TypingStop,
            Self::ChatNew(_) => EventKind::ChatNew,
            Self::Error { .. } => EventKind::Error,
            Self::Connected => EventKind::Connected,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::MaxReconnectReached { .. } => EventKind::MaxReconnectReached,
            Self::ConversationUpdated { .. } => EventKind::ConversationUpdated,
        }
    }

    /// Convert a server push into a bus event. `pong` has no bus event.
    pub fn from_server(event: ServerEvent) -> Option<Self> {
        Some(match event {
            ServerEvent::MessageNew(m) => Self::MessageNew(m),
            ServerEvent::MessageRead(r) => Self::MessageRead(r),
            ServerEvent::TypingStart(t) => Self::TypingStart(t),
            ServerEvent::TypingStop(t) => Self::TypingStop(t),
            ServerEvent::ChatNew(c) => Self::ChatNew(c),
            ServerEvent::Error(e) => Self::Error {
                origin: ErrorOrigin::Server,
                message: e.message,
            },
            ServerEvent::Pong => return None,
        })
    }
}

impl From<LifecycleEvent> for ClientEvent {
    fn from(event: LifecycleEvent) -> Self {
        match event {
            LifecycleEvent::Connected => Self::Connected,
            LifecycleEvent::Disconnected { reason } => Self::Disconnected { reason },
            LifecycleEvent::Reconnecting { attempt, delay } => Self::Reconnecting { attempt, delay },
            LifecycleEvent::ConnectionError { error } => Self::Error {
                origin: ErrorOrigin::Connection,
                message: error,
            },
            LifecycleEvent::MaxReconnectReached { attempts } => {
                Self::MaxReconnectReached { attempts }
            }
        }
    }
}

//! Protocol payloads for relaychat.
//!
//! [`ClientCommand`] is what the client sends, [`ServerEvent`] is what the
//! server pushes. Both travel inside an [`Envelope`](crate::Envelope).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChatId, LocalId, MessageId, UserId};

/// Delivery status of a message.
///
/// `Pending` never appears on the wire; it marks an optimistic local message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Composed locally, not yet confirmed by the server.
    Pending,
    /// Stored by the server.
    Sent,
    /// Delivered to the recipient's device.
    Delivered,
    /// Read by the recipient.
    Read,
}

impl Default for DeliveryStatus {
    fn default() -> Self {
        Self::Sent
    }
}

/// Wire discriminator for message bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// Reference to an uploaded file.
    File,
}

/// Reference to a file previously uploaded through the files API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Server file identifier.
    pub file_id: String,
    /// Original file name.
    pub file_name: Option<String>,
    /// Size in bytes.
    pub file_size: Option<u64>,
    /// MIME type.
    pub mime_type: Option<String>,
}

/// The content of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    /// Text message.
    Text(String),
    /// File attachment.
    File(FileRef),
}

impl MessageBody {
    /// The text content, if this is a text message.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::File(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Commands sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientCommand {
    /// Post a new message.
    #[serde(rename = "message.send")]
    SendMessage(SendMessage),
    /// The local user started typing.
    #[serde(rename = "typing.start")]
    TypingStart(ChatRef),
    /// The local user stopped typing.
    #[serde(rename = "typing.stop")]
    TypingStop(ChatRef),
    /// Mark a message (and everything before it) as read.
    #[serde(rename = "message.read")]
    MarkRead(MarkRead),
    /// Keep-alive.
    #[serde(rename = "ping")]
    Ping(Ping),
}

impl ClientCommand {
    /// The envelope `type` string for this command.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendMessage(_) => "message.send",
            Self::TypingStart(_) => "typing.start",
            Self::TypingStop(_) => "typing.stop",
            Self::MarkRead(_) => "message.read",
            Self::Ping(_) => "ping",
        }
    }

    /// Build a text `message.send` command.
    pub fn send_text(chat_id: ChatId, content: impl Into<String>, client_id: LocalId) -> Self {
        Self::SendMessage(SendMessage {
            chat_id,
            message_type: MessageKind::Text,
            content: content.into(),
            client_id: Some(client_id),
        })
    }
}

/// Payload of `message.send`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessage {
    /// Target conversation.
    pub chat_id: ChatId,
    /// Body discriminator (always `text` for locally composed messages).
    pub message_type: MessageKind,
    /// Text content.
    pub content: String,
    /// Local id of the optimistic copy. Servers that echo it back enable
    /// exact reconciliation; others ignore the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<LocalId>,
}

/// Payload naming a conversation (`typing.start` / `typing.stop`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRef {
    /// Target conversation.
    pub chat_id: ChatId,
}

/// Payload of outbound `message.read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkRead {
    /// Conversation being read.
    pub chat_id: ChatId,
    /// Newest message the user has seen.
    pub message_id: MessageId,
}

/// Empty keep-alive payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A message was posted in one of the user's conversations.
    MessageNew(InboundMessage),
    /// A message the user sent was read.
    MessageRead(ReadReceipt),
    /// A peer started typing.
    TypingStart(TypingNotice),
    /// A peer stopped typing.
    TypingStop(TypingNotice),
    /// The user was added to a new conversation.
    ChatNew(ChatSummary),
    /// The server rejected a command.
    Error(ServerError),
    /// Reply to a keep-alive.
    Pong,
}

impl ServerEvent {
    /// The envelope `type` string for this event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageNew(_) => "message.new",
            Self::MessageRead(_) => "message.read",
            Self::TypingStart(_) => "typing.start",
            Self::TypingStop(_) => "typing.stop",
            Self::ChatNew(_) => "chat.new",
            Self::Error(_) => "error",
            Self::Pong => "pong",
        }
    }
}

/// A server-confirmed message, as carried by `message.new` and returned by
/// the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawInboundMessage")]
pub struct InboundMessage {
    /// Server-assigned id.
    pub message_id: MessageId,
    /// Conversation the message belongs to.
    pub chat_id: ChatId,
    /// Author.
    pub sender_id: UserId,
    /// Body discriminator.
    pub message_type: MessageKind,
    /// Text content (text messages).
    pub content: Option<String>,
    /// File id (file messages).
    pub file_id: Option<String>,
    /// File name (file messages).
    pub file_name: Option<String>,
    /// File size in bytes (file messages).
    pub file_size: Option<u64>,
    /// MIME type (file messages).
    pub mime_type: Option<String>,
    /// Server-side status; absent means `sent`.
    pub status: DeliveryStatus,
    /// Server timestamp. Frames without one are stamped on arrival.
    pub timestamp: DateTime<Utc>,
    /// Echo of the sender's local id, when the server supports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<LocalId>,
}

/// Lenient decoding shape: `message.new` says `chat_id` and `timestamp`,
/// history rows say `chat` and carry both `timestamp` and `created_at`.
#[derive(Deserialize)]
struct RawInboundMessage {
    message_id: MessageId,
    #[serde(default)]
    chat_id: Option<ChatId>,
    #[serde(default)]
    chat: Option<ChatId>,
    sender_id: UserId,
    #[serde(default)]
    message_type: MessageKind,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    file_size: Option<u64>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    status: Option<DeliveryStatus>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    client_id: Option<LocalId>,
}

impl TryFrom<RawInboundMessage> for InboundMessage {
    type Error = String;

    fn try_from(raw: RawInboundMessage) -> Result<Self, Self::Error> {
        let chat_id = raw
            .chat_id
            .or(raw.chat)
            .ok_or_else(|| "missing field `chat_id`".to_string())?;
        Ok(Self {
            message_id: raw.message_id,
            chat_id,
            sender_id: raw.sender_id,
            message_type: raw.message_type,
            content: raw.content,
            file_id: raw.file_id,
            file_name: raw.file_name,
            file_size: raw.file_size,
            mime_type: raw.mime_type,
            status: raw.status.unwrap_or_default(),
            timestamp: raw.timestamp.or(raw.created_at).unwrap_or_else(Utc::now),
            client_id: raw.client_id,
        })
    }
}

impl InboundMessage {
    /// The decoded message body.
    ///
    /// A file message without a `file_id` degrades to its text content.
    pub fn body(&self) -> MessageBody {
        match (self.message_type, &self.file_id) {
            (MessageKind::File, Some(file_id)) => MessageBody::File(FileRef {
                file_id: file_id.clone(),
                file_name: self.file_name.clone(),
                file_size: self.file_size,
                mime_type: self.mime_type.clone(),
            }),
            _ => MessageBody::Text(self.content.clone().unwrap_or_default()),
        }
    }
}

/// Payload of inbound `message.read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// The message that was read.
    pub message_id: MessageId,
    /// When it was read, if the server says.
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

/// Payload of inbound `typing.start` / `typing.stop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingNotice {
    /// Conversation the peer is typing in.
    pub chat_id: ChatId,
    /// The peer.
    pub user_id: UserId,
}

/// Conversation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    /// One-to-one conversation.
    #[default]
    Private,
    /// Group conversation.
    Group,
}

/// A conversation as listed by the server (`chat.new`, conversation list).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSummary {
    /// Conversation id.
    pub id: ChatId,
    /// Group name, if any.
    #[serde(default)]
    pub name: Option<String>,
    /// Server-computed display name (peer name for private chats).
    #[serde(default)]
    pub chat_name: Option<String>,
    /// Conversation type.
    #[serde(rename = "type", default)]
    pub kind: ChatKind,
    /// Unread messages for the current user.
    #[serde(default)]
    pub unread_count: u32,
}

impl ChatSummary {
    /// Name to show in a conversation list.
    pub fn display_name(&self) -> &str {
        self.chat_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("Chat")
    }
}

/// Payload of inbound `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Human-readable reason.
    pub message: String,
}

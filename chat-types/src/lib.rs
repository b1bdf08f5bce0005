//! # chat-types
//!
//! Wire format types for the relaychat realtime protocol.
//!
//! This crate provides the foundational types used across all relaychat crates:
//! - [`ChatId`], [`UserId`], [`MessageId`], [`LocalId`], [`RequestId`] - Identity types
//! - [`Envelope`], [`OutboundEnvelope`] - JSON frame wrapper
//! - [`ClientCommand`], [`ServerEvent`] - Typed protocol messages
//! - [`WireError`] - Decode/encode errors

#![warn(missing_docs)]
#![warn(clippy::all)]

mod envelope;
mod error;
mod ids;
mod messages;

pub use envelope::{Envelope, OutboundEnvelope};
pub use error::WireError;
pub use ids::{ChatId, LocalId, MessageId, RequestId, UserId};
pub use messages::{
    ChatKind, ChatRef, ChatSummary, ClientCommand, DeliveryStatus, FileRef, InboundMessage,
    MarkRead, MessageBody, MessageKind, Ping, ReadReceipt, SendMessage, ServerError, ServerEvent,
    TypingNotice,
};

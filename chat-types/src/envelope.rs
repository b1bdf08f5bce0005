//! Envelope - the wire format wrapper for all relaychat frames.
//!
//! Every frame in either direction is a JSON text frame:
//!
//! ```text
//! { "type": "message.send", "payload": { ... }, "request_id": "req-..." }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ChatRef, ChatSummary, ClientCommand, InboundMessage, ReadReceipt, RequestId, ServerError,
    ServerEvent, TypingNotice, WireError,
};

/// The raw envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event / command discriminator.
    #[serde(rename = "type")]
    pub kind: String,
    /// Kind-specific body. Absent payloads decode as `null`.
    #[serde(default)]
    pub payload: Value,
    /// Correlation id. The server omits it on pushed events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

impl Envelope {
    /// Parse a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, WireError> {
        serde_json::from_str(text).map_err(WireError::Malformed)
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Serialization)
    }

    /// Decode the payload as a typed server event.
    pub fn into_server_event(self) -> Result<ServerEvent, WireError> {
        let kind = self.kind;
        let payload = self.payload;
        let event = match kind.as_str() {
            "message.new" => ServerEvent::MessageNew(typed::<InboundMessage>(&kind, payload)?),
            "message.read" => ServerEvent::MessageRead(typed::<ReadReceipt>(&kind, payload)?),
            "typing.start" => ServerEvent::TypingStart(typed::<TypingNotice>(&kind, payload)?),
            "typing.stop" => ServerEvent::TypingStop(typed::<TypingNotice>(&kind, payload)?),
            "chat.new" => ServerEvent::ChatNew(typed::<ChatSummary>(&kind, payload)?),
            "error" => ServerEvent::Error(typed::<ServerError>(&kind, payload)?),
            "pong" => ServerEvent::Pong,
            _ => return Err(WireError::UnknownType(kind)),
        };
        Ok(event)
    }
}

fn typed<T: serde::de::DeserializeOwned>(kind: &str, payload: Value) -> Result<T, WireError> {
    serde_json::from_value(payload).map_err(|source| WireError::InvalidPayload {
        kind: kind.to_string(),
        source,
    })
}

impl ServerEvent {
    /// Decode a JSON text frame into a typed event.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        Envelope::from_json(text)?.into_server_event()
    }
}

/// A client command ready for transmission.
///
/// Immutable once constructed: the correlation id is fixed at creation so a
/// queued envelope keeps its identity across reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEnvelope {
    command: ClientCommand,
    correlation_id: RequestId,
}

impl OutboundEnvelope {
    /// Wrap a command with a fresh correlation id.
    pub fn new(command: ClientCommand) -> Self {
        Self {
            command,
            correlation_id: RequestId::generate(),
        }
    }

    /// Wrap a command with a caller-chosen correlation id.
    pub fn with_correlation_id(command: ClientCommand, correlation_id: RequestId) -> Self {
        Self {
            command,
            correlation_id,
        }
    }

    /// The envelope `type`.
    pub fn kind(&self) -> &'static str {
        self.command.kind()
    }

    /// The typed command.
    pub fn command(&self) -> &ClientCommand {
        &self.command
    }

    /// The correlation id, sent as `request_id`.
    pub fn correlation_id(&self) -> &RequestId {
        &self.correlation_id
    }

    /// The conversation this envelope concerns, if any.
    pub fn chat_ref(&self) -> Option<ChatRef> {
        let chat_id = match &self.command {
            ClientCommand::SendMessage(m) => m.chat_id.clone(),
            ClientCommand::TypingStart(c) | ClientCommand::TypingStop(c) => c.chat_id.clone(),
            ClientCommand::MarkRead(m) => m.chat_id.clone(),
            ClientCommand::Ping(_) => return None,
        };
        Some(ChatRef { chat_id })
    }

    /// Serialize to the raw wire envelope.
    pub fn to_envelope(&self) -> Result<Envelope, WireError> {
        let tagged = serde_json::to_value(&self.command).map_err(WireError::Serialization)?;
        let payload = match tagged {
            Value::Object(mut map) => map.remove("payload").unwrap_or(Value::Null),
            _ => Value::Null,
        };
        Ok(Envelope {
            kind: self.kind().to_string(),
            payload,
            request_id: Some(self.correlation_id.clone()),
        })
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, WireError> {
        self.to_envelope()?.to_json()
    }
}

impl Envelope {
    /// Decode a client command (used by test servers and the mock transport).
    pub fn into_client_command(self) -> Result<(ClientCommand, Option<RequestId>), WireError> {
        let request_id = self.request_id;
        let kind = self.kind.clone();
        let tagged = serde_json::json!({ "type": self.kind, "payload": self.payload });
        let command = serde_json::from_value(tagged).map_err(|source| {
            if matches!(
                kind.as_str(),
                "message.send" | "typing.start" | "typing.stop" | "message.read" | "ping"
            ) {
                WireError::InvalidPayload { kind, source }
            } else {
                WireError::UnknownType(kind)
            }
        })?;
        Ok((command, request_id))
    }
}

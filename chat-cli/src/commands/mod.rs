//! CLI command implementations.

pub mod send;
pub mod status;
pub mod tail;

use anyhow::Result;
use chat_client::{ChatClient, ClientEvent, MockTransport, WebSocketTransport};
use chat_types::{ChatId, Envelope, MessageBody};
use serde_json::json;
use std::time::Duration;

use crate::config::Settings;

/// Start a client over the websocket, or over the mock echo server.
pub fn start_client(settings: Settings) -> Result<ChatClient> {
    let Settings {
        client,
        session,
        mock,
    } = settings;
    tracing::debug!(endpoint = %client.endpoint, user_id = %session.user_id(), mock, "starting client");

    if mock {
        let transport = MockTransport::new();
        tokio::spawn(echo_server(transport.clone(), session.user_id().to_string()));
        Ok(ChatClient::spawn(client, session, transport)?)
    } else {
        Ok(ChatClient::spawn(client, session, WebSocketTransport::new())?)
    }
}

/// Answer `message.send` with `message.new` and `ping` with `pong`, the
/// way the chat server does.
async fn echo_server(transport: MockTransport, user_id: String) {
    let mut answered = 0;
    let mut next_id = 1u64;
    let mut poll = tokio::time::interval(Duration::from_millis(50));
    loop {
        poll.tick().await;
        let sent: Vec<Envelope> = transport.sent_envelopes();
        for envelope in sent.iter().skip(answered) {
            match envelope.kind.as_str() {
                "message.send" => {
                    let payload = &envelope.payload;
                    transport.inject_event(
                        "message.new",
                        json!({
                            "message_id": format!("mock-{next_id}"),
                            "chat_id": payload["chat_id"],
                            "sender_id": user_id,
                            "message_type": "text",
                            "content": payload["content"],
                            "client_id": payload["client_id"],
                        }),
                    );
                    next_id += 1;
                }
                "ping" => transport.inject_frame(r#"{"type":"pong"}"#),
                _ => {}
            }
        }
        answered = sent.len();
    }
}

/// The conversation an event concerns, if any.
pub fn event_chat(event: &ClientEvent) -> Option<&ChatId> {
    match event {
        ClientEvent::MessageNew(message) => Some(&message.chat_id),
        ClientEvent::TypingStart(notice) | ClientEvent::TypingStop(notice) => {
            Some(&notice.chat_id)
        }
        ClientEvent::ChatNew(summary) => Some(&summary.id),
        ClientEvent::ConversationUpdated { chat_id } => Some(chat_id),
        _ => None,
    }
}

/// One-line rendering of an event.
pub fn describe(event: &ClientEvent) -> String {
    match event {
        ClientEvent::MessageNew(message) => {
            let body = match message.body() {
                MessageBody::Text(text) => text,
                MessageBody::File(file) => {
                    format!("<file {}>", file.file_name.unwrap_or(file.file_id))
                }
            };
            format!("[{}] {}: {}", message.chat_id, message.sender_id, body)
        }
        ClientEvent::MessageRead(receipt) => format!("read {}", receipt.message_id),
        ClientEvent::TypingStart(notice) => {
            format!("[{}] {} is typing", notice.chat_id, notice.user_id)
        }
        ClientEvent::TypingStop(notice) => {
            format!("[{}] {} stopped typing", notice.chat_id, notice.user_id)
        }
        ClientEvent::ChatNew(summary) => {
            format!("added to {} ({})", summary.display_name(), summary.id)
        }
        ClientEvent::Error { origin, message } => format!("error ({:?}): {}", origin, message),
        ClientEvent::Connected => "connected".to_string(),
        ClientEvent::Disconnected { reason } => format!("disconnected: {}", reason),
        ClientEvent::Reconnecting { attempt, delay } => {
            format!("reconnecting in {:?} (attempt {})", delay, attempt)
        }
        ClientEvent::MaxReconnectReached { attempts } => {
            format!("gave up after {} reconnect attempts", attempts)
        }
        ClientEvent::ConversationUpdated { chat_id } => format!("[{}] updated", chat_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_client::ErrorOrigin;
    use chat_types::{InboundMessage, TypingNotice, UserId};

    fn inbound(value: serde_json::Value) -> InboundMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn describes_text_message() {
        let event = ClientEvent::MessageNew(inbound(json!({
            "message_id": "S1", "chat_id": "c1", "sender_id": "7", "content": "hi"
        })));
        assert_eq!(describe(&event), "[c1] 7: hi");
        assert_eq!(event_chat(&event), Some(&ChatId::new("c1")));
    }

    #[test]
    fn describes_file_message_by_name() {
        let event = ClientEvent::MessageNew(inbound(json!({
            "message_id": "S2", "chat_id": "c1", "sender_id": "7",
            "message_type": "file", "file_id": "f-1", "file_name": "cat.png"
        })));
        assert_eq!(describe(&event), "[c1] 7: <file cat.png>");
    }

    #[test]
    fn describes_lifecycle_events() {
        let event = ClientEvent::Reconnecting {
            attempt: 2,
            delay: Duration::from_secs(2),
        };
        assert_eq!(describe(&event), "reconnecting in 2s (attempt 2)");
        assert_eq!(event_chat(&event), None);

        let event = ClientEvent::Error {
            origin: ErrorOrigin::Server,
            message: "Chat not found".into(),
        };
        assert_eq!(describe(&event), "error (Server): Chat not found");
    }

    #[test]
    fn typing_events_name_their_chat() {
        let event = ClientEvent::TypingStart(TypingNotice {
            chat_id: ChatId::new("c3"),
            user_id: UserId::new("9"),
        });
        assert_eq!(describe(&event), "[c3] 9 is typing");
        assert_eq!(event_chat(&event), Some(&ChatId::new("c3")));
    }

    #[tokio::test]
    async fn mock_client_round_trips_a_message() {
        let settings = Settings::resolve(None, None, None, None, true).unwrap();
        let client = start_client(settings).unwrap();
        let chat = ChatId::new("demo");

        client.connect().await.unwrap();
        let local_id = client.send_message(&chat, "echo me").await.unwrap();
        let confirmed = send::wait_confirmed(&client, &chat, local_id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(confirmed.as_str(), "mock-1");
        client.shutdown().await.unwrap();
    }
}

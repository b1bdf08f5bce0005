//! REST collaborator boundary.
//!
//! The realtime core needs three things from the chat server's HTTP API:
//! the conversation list (for unread counts), message history, and a
//! mark-read call whose success makes a local unread clear durable.
//! Authentication, CRUD and user search live outside this crate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chat_types::{ChatId, ChatSummary, InboundMessage};
use thiserror::Error;

/// Errors from the REST collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The token was rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// The conversation does not exist or is not visible to the user.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other request failure.
    #[error("request failed: {0}")]
    Request(String),
}

/// The subset of the chat REST API used by the client.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Conversations of the current user, with server unread counts.
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError>;

    /// Message history of a conversation, oldest first.
    async fn fetch_history(&self, chat_id: &ChatId) -> Result<Vec<InboundMessage>, ApiError>;

    /// Mark every message in a conversation read.
    async fn mark_read(&self, chat_id: &ChatId) -> Result<(), ApiError>;
}

/// In-memory [`ChatApi`] for tests and offline harnesses.
///
/// Clones share state.
#[derive(Debug, Default, Clone)]
pub struct MockChatApi {
    inner: Arc<Mutex<MockChatApiInner>>,
}

#[derive(Debug, Default)]
struct MockChatApiInner {
    chats: Vec<ChatSummary>,
    history: HashMap<ChatId, Vec<InboundMessage>>,
    mark_read_calls: Vec<ChatId>,
    fail_next_mark_read: Option<ApiError>,
}

impl MockChatApi {
    /// Create an empty API.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockChatApiInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a conversation to the list.
    pub fn add_chat(&self, chat: ChatSummary) {
        self.lock().chats.push(chat);
    }

    /// Set the history of a conversation.
    pub fn set_history(&self, chat_id: ChatId, messages: Vec<InboundMessage>) {
        self.lock().history.insert(chat_id, messages);
    }

    /// Cause the next mark_read() to fail.
    pub fn fail_next_mark_read(&self, error: ApiError) {
        self.lock().fail_next_mark_read = Some(error);
    }

    /// Conversations passed to mark_read(), in call order.
    pub fn mark_read_calls(&self) -> Vec<ChatId> {
        self.lock().mark_read_calls.clone()
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn list_chats(&self) -> Result<Vec<ChatSummary>, ApiError> {
        Ok(self.lock().chats.clone())
    }

    async fn fetch_history(&self, chat_id: &ChatId) -> Result<Vec<InboundMessage>, ApiError> {
        let inner = self.lock();
        let known = inner.chats.iter().any(|c| &c.id == chat_id);
        match inner.history.get(chat_id) {
            Some(messages) => Ok(messages.clone()),
            None if known => Ok(Vec::new()),
            None => Err(ApiError::NotFound(chat_id.to_string())),
        }
    }

    async fn mark_read(&self, chat_id: &ChatId) -> Result<(), ApiError> {
        let mut inner = self.lock();
        inner.mark_read_calls.push(chat_id.clone());
        match inner.fail_next_mark_read.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_types::ChatKind;

    fn summary(id: &str) -> ChatSummary {
        ChatSummary {
            id: ChatId::new(id),
            name: None,
            chat_name: Some("Alice".into()),
            kind: ChatKind::Private,
            unread_count: 1,
        }
    }

    #[tokio::test]
    async fn lists_added_chats() {
        let api = MockChatApi::new();
        api.add_chat(summary("c1"));
        assert_eq!(api.list_chats().await.unwrap(), vec![summary("c1")]);
    }

    #[tokio::test]
    async fn history_of_unknown_chat_is_not_found() {
        let api = MockChatApi::new();
        api.add_chat(summary("c1"));
        assert_eq!(api.fetch_history(&ChatId::new("c1")).await.unwrap(), vec![]);
        assert!(matches!(
            api.fetch_history(&ChatId::new("zz")).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mark_read_records_calls_and_fails_once() {
        let api = MockChatApi::new();
        api.fail_next_mark_read(ApiError::Request("503".into()));

        assert!(api.mark_read(&ChatId::new("c1")).await.is_err());
        assert!(api.mark_read(&ChatId::new("c1")).await.is_ok());
        assert_eq!(api.mark_read_calls().len(), 2);
    }
}

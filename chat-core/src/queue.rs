//! Outbound queue for relaychat.
//!
//! This module provides the FIFO of envelopes waiting for a connection:
//! - FIFO ordering for delivery across reconnects
//! - A capacity bound; on overflow the oldest envelope is evicted
//! - Requeue at the head when a send fails mid-drain
//!
//! The queue is used by chat-client while the connection is not open.
//! Envelopes are pushed, then popped one by one when the connection comes
//! back and handed to the transport.

use std::collections::VecDeque;

use chat_types::OutboundEnvelope;

/// Default number of envelopes held while offline.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// FIFO of envelopes waiting for a connection.
///
/// Envelopes flow through the queue in this order:
/// 1. `push()` - add to the tail (evicting the oldest if full)
/// 2. `pop_front()` - take the oldest for transmission
///
/// If transmission fails, call `requeue_front()` so the envelope goes out
/// first on the next drain.
#[derive(Debug)]
pub struct OutboundQueue {
    capacity: usize,
    queue: VecDeque<OutboundEnvelope>,
}

impl OutboundQueue {
    /// Create a new queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queue: VecDeque::new(),
        }
    }

    /// Append an envelope, evicting the oldest one if the queue is full.
    ///
    /// Returns the evicted envelope, if any. With a capacity of zero the
    /// pushed envelope itself is returned.
    pub fn push(&mut self, envelope: OutboundEnvelope) -> Option<OutboundEnvelope> {
        if self.capacity == 0 {
            return Some(envelope);
        }
        let evicted = if self.queue.len() >= self.capacity {
            self.queue.pop_front()
        } else {
            None
        };
        self.queue.push_back(envelope);
        evicted
    }

    /// Remove and return the oldest envelope.
    pub fn pop_front(&mut self) -> Option<OutboundEnvelope> {
        self.queue.pop_front()
    }

    /// Put an envelope back at the head after a failed send.
    ///
    /// Capacity is not enforced: the envelope was already accounted for.
    pub fn requeue_front(&mut self, envelope: OutboundEnvelope) {
        self.queue.push_front(envelope);
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_types::{ChatId, ChatRef, ClientCommand, LocalId};
    use proptest::prelude::*;

    fn make_send(content: &str) -> OutboundEnvelope {
        OutboundEnvelope::new(ClientCommand::send_text(
            ChatId::new("c1"),
            content,
            LocalId::new(),
        ))
    }

    fn content_of(envelope: &OutboundEnvelope) -> &str {
        match envelope.command() {
            ClientCommand::SendMessage(m) => &m.content,
            _ => "",
        }
    }

    fn drain(queue: &mut OutboundQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop_front())
            .map(|e| content_of(&e).to_string())
            .collect()
    }

    #[test]
    fn queue_holds_envelopes() {
        let mut queue = OutboundQueue::new(10);
        assert!(queue.push(make_send("a")).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn queue_pops_in_order() {
        let mut queue = OutboundQueue::new(10);
        queue.push(make_send("1"));
        queue.push(make_send("2"));

        assert_eq!(content_of(&queue.pop_front().unwrap()), "1");
        assert_eq!(content_of(&queue.pop_front().unwrap()), "2");
        assert!(queue.pop_front().is_none());
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut queue = OutboundQueue::new(2);
        queue.push(make_send("1"));
        queue.push(make_send("2"));

        let evicted = queue.push(make_send("3")).unwrap();

        assert_eq!(content_of(&evicted), "1");
        assert_eq!(queue.len(), 2);
        assert_eq!(drain(&mut queue), vec!["2", "3"]);
    }

    #[test]
    fn zero_capacity_rejects_everything() {
        let mut queue = OutboundQueue::new(0);
        let returned = queue.push(make_send("x")).unwrap();
        assert_eq!(content_of(&returned), "x");
        assert!(queue.is_empty());
    }

    #[test]
    fn requeue_goes_to_front() {
        let mut queue = OutboundQueue::new(10);
        queue.push(make_send("1"));
        queue.push(make_send("2"));

        let first = queue.pop_front().unwrap();
        let id = first.correlation_id().clone();
        queue.requeue_front(first);

        let retry = queue.pop_front().unwrap();
        assert_eq!(retry.correlation_id(), &id);
    }

    #[test]
    fn requeue_keeps_correlation_id_and_ignores_capacity() {
        let mut queue = OutboundQueue::new(1);
        queue.push(make_send("1"));
        let typing = OutboundEnvelope::new(ClientCommand::TypingStop(ChatRef {
            chat_id: ChatId::new("c1"),
        }));
        queue.requeue_front(typing.clone());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front(), Some(typing));
    }

    #[test]
    fn default_capacity() {
        assert_eq!(OutboundQueue::default().capacity(), DEFAULT_QUEUE_CAPACITY);
    }

    proptest! {
        #[test]
        fn drain_preserves_issue_order(contents in proptest::collection::vec("[a-z]{1,8}", 0..50)) {
            let mut queue = OutboundQueue::new(64);
            for c in &contents {
                queue.push(make_send(c));
            }
            prop_assert_eq!(drain(&mut queue), contents);
        }

        #[test]
        fn overflow_keeps_newest_suffix(
            contents in proptest::collection::vec("[a-z]{1,8}", 0..50),
            capacity in 1usize..16,
        ) {
            let mut queue = OutboundQueue::new(capacity);
            for c in &contents {
                queue.push(make_send(c));
            }
            let kept = drain(&mut queue);
            let start = contents.len().saturating_sub(capacity);
            prop_assert_eq!(kept, contents[start..].to_vec());
        }
    }
}

//! Mock transport for testing.
//!
//! Allows injecting inbound frames, forcing connect/send failures,
//! simulating a dropped connection, and capturing sent frames.

use super::{Transport, TransportError};
use async_trait::async_trait;
use chat_types::Envelope;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one handle while the client owns
/// another.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    inbound_ready: Arc<Notify>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    endpoint: Option<String>,
    token: Option<String>,
    connect_attempts: u32,
    sent_frames: Vec<String>,
    inbound: VecDeque<Result<String, TransportError>>,
    fail_next_connect: Option<String>,
    failing_connects: u32,
    refuse_all_connects: bool,
    fail_next_send: Option<String>,
    fail_next_recv: Option<String>,
    stall_connects: bool,
    stall_sends: bool,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame to be returned by `recv()`.
    pub fn inject_frame(&self, frame: impl Into<String>) {
        self.lock().inbound.push_back(Ok(frame.into()));
        self.inbound_ready.notify_one();
    }

    /// Queue a server event built from `kind` and `payload`.
    pub fn inject_event(&self, kind: &str, payload: serde_json::Value) {
        let frame = serde_json::json!({ "type": kind, "payload": payload }).to_string();
        self.inject_frame(frame);
    }

    /// Simulate the server dropping the connection.
    ///
    /// Pending inbound frames are discarded; the next `recv()` fails with
    /// `ConnectionClosed` and sends fail with `NotConnected`.
    pub fn drop_connection(&self) {
        let mut inner = self.lock();
        inner.connected = false;
        inner.inbound.clear();
        inner.inbound.push_back(Err(TransportError::ConnectionClosed));
        drop(inner);
        self.inbound_ready.notify_one();
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<String> {
        self.lock().sent_frames.clone()
    }

    /// Sent frames decoded as envelopes (undecodable frames are skipped).
    pub fn sent_envelopes(&self) -> Vec<Envelope> {
        self.sent_frames()
            .iter()
            .filter_map(|f| Envelope::from_json(f).ok())
            .collect()
    }

    /// The `type` of every sent frame, in order.
    pub fn sent_kinds(&self) -> Vec<String> {
        self.sent_envelopes().into_iter().map(|e| e.kind).collect()
    }

    /// Get the endpoint that was connected to.
    pub fn connected_endpoint(&self) -> Option<String> {
        self.lock().endpoint.clone()
    }

    /// Get the token used for the last successful connect.
    pub fn last_token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    /// Number of `connect()` calls so far, successful or not.
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next `count` connect() calls to fail.
    pub fn fail_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    /// Refuse every connect() until turned off.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_all_connects = refuse;
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next recv() to fail with the given error.
    pub fn fail_next_recv(&self, error: &str) {
        self.lock().fail_next_recv = Some(error.to_string());
        self.inbound_ready.notify_one();
    }

    /// Make connect() hang until turned off, like a blackholed host.
    /// The attempt is still counted.
    pub fn stall_connects(&self, stall: bool) {
        self.lock().stall_connects = stall;
    }

    /// Make send() on a live connection hang until turned off.
    pub fn stall_sends(&self, stall: bool) {
        self.lock().stall_sends = stall;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, endpoint: &str, token: &str) -> Result<(), TransportError> {
        let stalled = {
            let mut inner = self.lock();
            inner.connect_attempts += 1;
            inner.stall_connects
        };
        if stalled {
            return std::future::pending().await;
        }

        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }
        if inner.failing_connects > 0 {
            inner.failing_connects -= 1;
            return Err(TransportError::ConnectionFailed("connection refused".into()));
        }
        if inner.refuse_all_connects {
            return Err(TransportError::ConnectionFailed("connection refused".into()));
        }

        // A fresh connection never sees the previous one's close.
        inner
            .inbound
            .retain(|item| !matches!(item, Err(TransportError::ConnectionClosed)));
        inner.connected = true;
        inner.endpoint = Some(endpoint.to_string());
        inner.token = Some(token.to_string());
        Ok(())
    }

    async fn send(&self, frame: &str) -> Result<(), TransportError> {
        let stalled = {
            let inner = self.lock();
            if !inner.connected {
                return Err(TransportError::NotConnected);
            }
            inner.stall_sends
        };
        if stalled {
            return std::future::pending().await;
        }

        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_frames.push(frame.to_string());
        Ok(())
    }

    async fn recv(&self) -> Result<String, TransportError> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(error) = inner.fail_next_recv.take() {
                    return Err(TransportError::ReceiveFailed(error));
                }
                if let Some(item) = inner.inbound.pop_front() {
                    return item;
                }
                if !inner.connected {
                    return Err(TransportError::NotConnected);
                }
            }
            self.inbound_ready.notified().await;
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) {
        let mut inner = self.lock();
        inner.connected = false;
        inner.inbound.clear();
        drop(inner);
        self.inbound_ready.notify_one();
    }
}

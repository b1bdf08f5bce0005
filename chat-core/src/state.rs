//! Connection state machine for relaychat.
//!
//! This module provides a pure, side-effect-free state machine for the
//! connection lifecycle. The state machine takes events as input and produces
//! a new state plus a list of actions to execute.
//!
//! The actual I/O (connecting, sending frames, arming timers) is performed by
//! chat-client, not by this module. This enables instant unit testing without
//! network mocks.

use std::time::Duration;

/// Reconnect and keep-alive policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Reconnect attempts allowed after a connection is lost.
    pub max_attempts: u32,
    /// Keep-alive interval while connected.
    pub heartbeat_interval: Duration,
}

impl ReconnectPolicy {
    /// Backoff before reconnect attempt `attempt` (1-based).
    ///
    /// Formula: base_delay × 2^(attempt−1). No cap, no jitter; the attempt
    /// count is what bounds the total wait.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, and not trying to.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected; outbound frames go straight to the transport.
    Connected,
    /// Connection lost; waiting for or performing reconnect attempt `attempt`.
    Reconnecting {
        /// Current reconnect attempt (1-based).
        attempt: u32,
    },
    /// Reconnect attempts exhausted. Only an explicit connect leaves this state.
    Failed,
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (chat-client)
    /// is responsible for executing the returned actions in order.
    pub fn on_event(self, event: Event, policy: &ReconnectPolicy) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Disconnected / Failed
            (Self::Disconnected | Self::Failed, Event::ConnectRequested) => {
                (Self::Connecting, vec![Action::Connect])
            }

            // From Connecting
            (Self::Connecting, Event::ConnectSucceeded) => (Self::Connected, on_open(policy)),
            (Self::Connecting, Event::ConnectFailed { error }) => {
                let mut actions = vec![Action::Emit(LifecycleEvent::ConnectionError { error })];
                let (state, retry) = schedule_retry(1, policy);
                actions.extend(retry);
                (state, actions)
            }

            // From Connected
            (Self::Connected, Event::HeartbeatDue) => (Self::Connected, vec![Action::SendPing]),
            (Self::Connected, Event::ConnectionLost { reason }) => {
                let mut actions = vec![
                    Action::StopHeartbeat,
                    Action::Close,
                    Action::Emit(LifecycleEvent::Disconnected { reason }),
                ];
                let (state, retry) = schedule_retry(1, policy);
                actions.extend(retry);
                (state, actions)
            }

            // From Reconnecting
            (Self::Reconnecting { attempt }, Event::ReconnectTimerFired) => {
                (Self::Reconnecting { attempt }, vec![Action::Connect])
            }
            (Self::Reconnecting { .. }, Event::ConnectSucceeded) => {
                (Self::Connected, on_open(policy))
            }
            (Self::Reconnecting { attempt }, Event::ConnectFailed { error }) => {
                let mut actions = vec![Action::Emit(LifecycleEvent::ConnectionError { error })];
                let (state, retry) = if attempt >= policy.max_attempts {
                    exhausted(attempt)
                } else {
                    schedule_retry(attempt.saturating_add(1), policy)
                };
                actions.extend(retry);
                (state, actions)
            }

            // Explicit disconnect wins from every state
            (Self::Connected, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::StopHeartbeat,
                    Action::Close,
                    Action::Emit(LifecycleEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),
            (Self::Connecting, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::Close,
                    Action::Emit(LifecycleEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),
            (Self::Reconnecting { .. }, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::CancelReconnect,
                    Action::Close,
                    Action::Emit(LifecycleEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),
            (Self::Failed, Event::DisconnectRequested) => (Self::Disconnected, vec![]),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }

    /// Short lowercase name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Failed => "failed",
        }
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

fn on_open(policy: &ReconnectPolicy) -> Vec<Action> {
    vec![
        Action::StartHeartbeat {
            interval: policy.heartbeat_interval,
        },
        Action::Emit(LifecycleEvent::Connected),
        Action::FlushQueue,
    ]
}

fn schedule_retry(attempt: u32, policy: &ReconnectPolicy) -> (ConnectionState, Vec<Action>) {
    if attempt > policy.max_attempts {
        return exhausted(attempt.saturating_sub(1));
    }
    let delay = policy.delay_for(attempt);
    (
        ConnectionState::Reconnecting { attempt },
        vec![
            Action::StartReconnectTimer { delay },
            Action::Emit(LifecycleEvent::Reconnecting { attempt, delay }),
        ],
    )
}

fn exhausted(attempts: u32) -> (ConnectionState, Vec<Action>) {
    (
        ConnectionState::Failed,
        vec![Action::Emit(LifecycleEvent::MaxReconnectReached { attempts })],
    )
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// User requested connection.
    ConnectRequested,
    /// Transport connection succeeded.
    ConnectSucceeded,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// An established connection was lost (close frame, read/write error).
    ConnectionLost {
        /// Reason for disconnection.
        reason: String,
    },
    /// User requested disconnect.
    DisconnectRequested,
    /// Reconnect timer fired.
    ReconnectTimerFired,
    /// Keep-alive interval elapsed.
    HeartbeatDue,
}

/// Actions to be executed by chat-client.
///
/// These are instructions, not side effects. chat-client interprets them
/// and performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the transport.
    Connect,
    /// Close the transport (idempotent).
    Close,
    /// Arm the keep-alive interval.
    StartHeartbeat {
        /// Interval between pings.
        interval: Duration,
    },
    /// Cancel the keep-alive interval.
    StopHeartbeat,
    /// Send a keep-alive ping.
    SendPing,
    /// Transmit every queued envelope, oldest first.
    FlushQueue,
    /// Arm the reconnect timer.
    StartReconnectTimer {
        /// Delay before attempting reconnection.
        delay: Duration,
    },
    /// Cancel any pending reconnect timer.
    CancelReconnect,
    /// Publish a lifecycle event to subscribers.
    Emit(LifecycleEvent),
}

/// Connection lifecycle events synthesized locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Transport is open.
    Connected,
    /// Transport closed (lost or by request).
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// A reconnect attempt is scheduled.
    Reconnecting {
        /// Which attempt is scheduled.
        attempt: u32,
        /// Delay before it runs.
        delay: Duration,
    },
    /// A connection attempt failed.
    ConnectionError {
        /// Error message describing the failure.
        error: String,
    },
    /// Reconnect attempts exhausted; no further automatic retry.
    MaxReconnectReached {
        /// Attempts made.
        attempts: u32,
    },
}

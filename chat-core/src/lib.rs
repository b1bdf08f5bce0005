//! # chat-core
//!
//! Pure logic for relaychat (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms of the realtime
//! chat client without any network or timer I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input (including the
//! current time) and produce output without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (network, timers) is performed by `chat-client`, which
//! interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod conversation;
pub mod event;
pub mod presence;
pub mod queue;
pub mod reconciler;
pub mod state;

pub use bus::{EventBus, Subscription};
pub use conversation::{Conversation, Message};
pub use event::{ClientEvent, ErrorOrigin, EventKind};
pub use presence::{OnlineTracker, TypingDebouncer, DEFAULT_ONLINE_WINDOW, DEFAULT_TYPING_IDLE};
pub use queue::{OutboundQueue, DEFAULT_QUEUE_CAPACITY};
pub use reconciler::{Applied, MarkReadRequest, Reconciler, DEFAULT_RECONCILE_WINDOW};
pub use state::{Action, ConnectionState, Event, LifecycleEvent, ReconnectPolicy};

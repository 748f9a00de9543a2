//! Sans-IO state machines for realtime thread reconciliation.
//!
//! The messaging views of the portal reconcile one message list from three
//! concurrent sources: an initial REST fetch, periodic REST polls, and
//! WebSocket pushes, plus optimistic entries created locally on send. This
//! crate holds that reconciliation logic as pure state machines with no I/O
//! dependencies, so the same code is exercised in unit tests, property
//! tests, and production.
//!
//! # Components
//!
//! - [`ConnectionManager`]: socket lifecycle and bounded reconnect policy
//! - [`MergeEngine`]: ordered, de-duplicated per-thread message list
//! - [`TypingTracker`]: debounced local typing plus expiring remote set
//! - [`Inbox`]: thread summary list, unread counts, active selection
//!
//! Time never comes from the system clock: the typing tracker takes an
//! `Instant`-like parameter on every call, and the connection manager
//! delegates its reconnect timer to the runtime through
//! [`SocketAction::ScheduleReconnect`]. The runtime layer supplies real
//! time; tests supply virtual time.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod connection;
mod error;
mod identity;
mod inbox;
mod merge;
mod typing;

pub use connection::{
    ConnectionManager, ConnectionStatus, MAX_RECONNECT_ATTEMPTS, NORMAL_CLOSURE, RECONNECT_DELAY,
    SocketAction, SocketState,
};
pub use error::ClientError;
pub use identity::Viewer;
pub use inbox::{FetchTicket, Inbox, InboxAction, LaunchTarget, format_relative};
pub use merge::{CONFIRM_WINDOW, MergeEngine};
pub use typing::{TYPING_DEBOUNCE, TYPING_EXPIRY, TypingTick, TypingTracker, TypingUser};

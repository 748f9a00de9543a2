//! Socket lifecycle state machine.
//!
//! Manages the one live connection bound to the currently selected thread:
//! open, abnormal-close reconnect with a bounded attempt ceiling, and
//! intentional teardown. Uses the action pattern: methods return actions
//! for the runtime to execute, keeping the machine pure and testable
//! without a socket.
//!
//! # State machine
//!
//! ```text
//! ┌──────┐ connect ┌────────────┐  opened   ┌──────┐
//! │ Idle │────────>│ Connecting │──────────>│ Open │
//! └──────┘         └────────────┘           └──────┘
//!                        ^                      │ closed
//!                        │ reconnect_due        ↓
//!                        │ (attempts < 5)   ┌────────┐
//!                        └──────────────────│ Closed │
//!                                           └────────┘
//! ```
//!
//! `disconnect()` forces `Closed` from any state with a normal-closure
//! code and suppresses auto-reconnect until the next `connect()`.

use std::time::Duration;

use caseline_proto::ThreadId;

use crate::error::ClientError;

/// Delay before each reconnect attempt after an abnormal close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Reconnect attempts allowed before the connection is declared dead.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// WebSocket normal-closure code. Any other close code triggers the
/// reconnect policy.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Actions returned by the connection state machine.
///
/// The runtime executes these: opening and closing real sockets and arming
/// the reconnect timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketAction {
    /// Open a socket bound to this thread.
    Open {
        /// Thread to bind the socket to.
        thread: ThreadId,
    },

    /// Close the current socket with this code.
    Close {
        /// WebSocket close code.
        code: u16,
    },

    /// Arm the reconnect timer; call [`ConnectionManager::reconnect_due`]
    /// when it fires.
    ScheduleReconnect {
        /// Delay before the next attempt.
        delay: Duration,
    },
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    /// No socket and none wanted.
    Idle,
    /// Socket opening (initial or reconnect).
    Connecting,
    /// Socket open; frames may be sent.
    Open,
    /// Close requested, not yet confirmed.
    Closing,
    /// Socket closed.
    Closed,
}

/// Snapshot of connection health for UI indicators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Whether the socket is open.
    pub connected: bool,
    /// Reconnect attempts made since the last successful open.
    pub reconnect_attempts: u32,
    /// Most recent error, if any.
    pub last_error: Option<ClientError>,
}

/// Socket lifecycle and reconnect policy for the active thread.
///
/// Pure state machine: no I/O, no timers. The runtime reports socket
/// events (`opened`, `closed`, `transport_error`) and executes the
/// returned [`SocketAction`]s.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    state: SocketState,
    thread: Option<ThreadId>,
    attempts: u32,
    last_error: Option<ClientError>,
    /// Cleared by `disconnect()` so a late close frame cannot resurrect
    /// the connection.
    reconnect_enabled: bool,
    reconnect_pending: bool,
    /// Realtime can be disabled wholesale (poll-only mode).
    enabled: bool,
}

impl ConnectionManager {
    /// Create a manager. When `enabled` is false every operation is a
    /// no-op and the client runs poll-only.
    pub fn new(enabled: bool) -> Self {
        Self {
            state: SocketState::Idle,
            thread: None,
            attempts: 0,
            last_error: None,
            reconnect_enabled: true,
            reconnect_pending: false,
            enabled,
        }
    }

    /// Bind the connection to a thread, tearing down any existing socket.
    ///
    /// A `None` thread (or realtime disabled) is a no-op beyond closing
    /// whatever was open.
    pub fn connect(&mut self, thread: Option<ThreadId>) -> Vec<SocketAction> {
        let mut actions = Vec::new();
        if matches!(self.state, SocketState::Connecting | SocketState::Open) {
            actions.push(SocketAction::Close { code: NORMAL_CLOSURE });
        }
        self.reconnect_pending = false;
        self.attempts = 0;
        self.last_error = None;
        self.reconnect_enabled = true;

        let Some(thread) = thread else {
            self.state = SocketState::Idle;
            self.thread = None;
            return actions;
        };
        if !self.enabled {
            self.state = SocketState::Idle;
            self.thread = None;
            return actions;
        }

        self.state = SocketState::Connecting;
        self.thread = Some(thread.clone());
        actions.push(SocketAction::Open { thread });
        actions
    }

    /// The socket opened successfully.
    pub fn opened(&mut self) {
        self.state = SocketState::Open;
        self.attempts = 0;
        self.last_error = None;
        self.reconnect_pending = false;
    }

    /// The socket closed with the given code.
    ///
    /// Abnormal closes schedule a reconnect until the attempt ceiling is
    /// reached, after which the error is terminal.
    pub fn closed(&mut self, code: u16) -> Vec<SocketAction> {
        self.state = SocketState::Closed;
        if code == NORMAL_CLOSURE || !self.reconnect_enabled {
            return Vec::new();
        }
        if self.attempts >= MAX_RECONNECT_ATTEMPTS {
            self.last_error = Some(ClientError::ReconnectExhausted { attempts: self.attempts });
            return Vec::new();
        }
        self.attempts += 1;
        self.reconnect_pending = true;
        vec![SocketAction::ScheduleReconnect { delay: RECONNECT_DELAY }]
    }

    /// The reconnect timer fired.
    pub fn reconnect_due(&mut self) -> Vec<SocketAction> {
        if !self.reconnect_pending || !self.reconnect_enabled {
            return Vec::new();
        }
        self.reconnect_pending = false;
        let Some(thread) = self.thread.clone() else {
            return Vec::new();
        };
        self.state = SocketState::Connecting;
        vec![SocketAction::Open { thread }]
    }

    /// Intentionally tear down the connection and suppress auto-reconnect.
    pub fn disconnect(&mut self) -> Vec<SocketAction> {
        self.reconnect_enabled = false;
        self.reconnect_pending = false;
        let was_live = matches!(self.state, SocketState::Connecting | SocketState::Open);
        self.state = if was_live { SocketState::Closing } else { SocketState::Closed };
        self.thread = None;
        self.attempts = 0;
        if was_live { vec![SocketAction::Close { code: NORMAL_CLOSURE }] } else { Vec::new() }
    }

    /// Record a non-fatal transport error.
    pub fn transport_error(&mut self, description: impl Into<String>) {
        self.last_error = Some(ClientError::Transport(description.into()));
    }

    /// Whether frames may currently be sent.
    pub fn can_send(&self) -> bool {
        self.state == SocketState::Open
    }

    /// Current state.
    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Thread the connection is bound to.
    pub fn thread(&self) -> Option<&ThreadId> {
        self.thread.as_ref()
    }

    /// Health snapshot for UI indicators.
    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.state == SocketState::Open,
            reconnect_attempts: self.attempts,
            last_error: self.last_error.clone(),
        }
    }
}

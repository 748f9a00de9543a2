//! Error taxonomy for the reconciliation client.
//!
//! Strongly-typed errors so the boundary layer can decide what recovers
//! automatically (transport), what is retryable by the user (send
//! failures), and what is fatal for the operation (auth, validation).
//! Merge inconsistencies never appear here: the merge engine resolves them
//! silently.

use caseline_proto::ThreadId;
use thiserror::Error;

/// Errors surfaced by the reconciliation client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Network or socket failure. Recovered automatically where possible.
    #[error("transport error: {0}")]
    Transport(String),

    /// Missing or rejected credential. Fatal for the operation; no retry.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Rejected before any network call (empty send, missing field).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A message send failed on every available path. The optimistic entry
    /// was rolled back and the draft returned to the caller.
    #[error("send failed on thread {thread}: {reason}")]
    SendFailed {
        /// Thread the send targeted.
        thread: ThreadId,
        /// Underlying failure description.
        reason: String,
    },

    /// The reconnect ceiling was exhausted. Terminal: the user must
    /// explicitly refresh to try again.
    #[error("failed to connect after {attempts} attempts, refresh the page")]
    ReconnectExhausted {
        /// How many reconnects were attempted.
        attempts: u32,
    },
}

impl ClientError {
    /// Whether retrying the same operation may succeed.
    ///
    /// Transport hiccups and send failures are transient. Auth and
    /// validation failures need user action first, and ceiling exhaustion
    /// needs an explicit refresh.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::SendFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_send_failures_are_transient() {
        assert!(ClientError::Transport("reset by peer".into()).is_transient());
        assert!(
            ClientError::SendFailed { thread: ThreadId::new("t1"), reason: "503".into() }
                .is_transient()
        );
    }

    #[test]
    fn auth_validation_and_exhaustion_are_not() {
        assert!(!ClientError::Auth("no token".into()).is_transient());
        assert!(!ClientError::Validation("empty message".into()).is_transient());
        assert!(!ClientError::ReconnectExhausted { attempts: 5 }.is_transient());
    }
}

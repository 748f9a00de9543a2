//! Auth credential seam.
//!
//! Token storage and refresh are out of scope; the session only needs a
//! way to ask "what is the current access token". The same token
//! authenticates REST calls (bearer header) and the socket handshake
//! (query parameter).

use std::sync::RwLock;

/// Supplies the current access token.
pub trait TokenProvider: Send + Sync {
    /// The current token, or `None` when the viewer is not authenticated.
    fn access_token(&self) -> Option<String>;
}

/// A token provider backed by a single replaceable value. Suitable for
/// tests and for hosts that refresh tokens externally.
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
}

impl StaticToken {
    /// Provider holding `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: RwLock::new(Some(token.into())) }
    }

    /// Replace the stored token (`None` to sign out).
    pub fn set(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }
}

impl TokenProvider for StaticToken {
    fn access_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }
}

//! Typing indicator tracking.
//!
//! Two halves, both tick-driven with time passed in:
//!
//! - Local: emit `typing=true` when the viewer starts composing and
//!   `typing=false` after [`TYPING_DEBOUNCE`] without further input.
//! - Remote: an expiring set of users currently typing in the active
//!   thread. The whole set is cleared [`TYPING_EXPIRY`] after its last
//!   change so a missed stop-event can never leave an indicator stuck.

use std::ops::Sub;
use std::time::{Duration, Instant};

/// Silence after the last local keystroke before `typing=false` is sent.
pub const TYPING_DEBOUNCE: Duration = Duration::from_secs(2);

/// Lifetime of the remote typing set without fresh events.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(3);

/// A user currently typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    /// User id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Outcome of a [`TypingTracker::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypingTick {
    /// The debounce elapsed: send `typing=false` over the socket.
    pub send_stop: bool,
    /// The remote set expired and was cleared: re-render the indicator.
    pub remote_cleared: bool,
}

/// Tracks who is typing in the active thread.
///
/// Generic over the instant type so tests can drive virtual time, same as
/// the connection layer.
#[derive(Debug, Clone)]
pub struct TypingTracker<I = Instant>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    remote: Vec<TypingUser>,
    last_remote_change: Option<I>,
    local_active: bool,
    last_local_input: Option<I>,
}

impl<I> Default for TypingTracker<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    fn default() -> Self {
        Self { remote: Vec::new(), last_remote_change: None, local_active: false, last_local_input: None }
    }
}

impl<I> TypingTracker<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Users currently typing, in arrival order.
    pub fn typing_users(&self) -> &[TypingUser] {
        &self.remote
    }

    /// The compose input changed.
    ///
    /// Returns the typing flag to send over the socket, if any. The caller
    /// only sends it when the socket is open; an unsendable start is not
    /// latched (the next keystroke retries).
    pub fn local_input(&mut self, now: I, non_empty: bool) -> Option<bool> {
        if non_empty {
            self.last_local_input = Some(now);
            if !self.local_active {
                self.local_active = true;
                return Some(true);
            }
            None
        } else if self.local_active {
            // Cleared input stops immediately rather than waiting out the
            // debounce.
            self.local_active = false;
            self.last_local_input = None;
            Some(false)
        } else {
            None
        }
    }

    /// A remote typing event arrived. Idempotent. Returns whether the set
    /// changed (and the indicator needs a re-render).
    pub fn remote_event(&mut self, now: I, user: TypingUser, is_typing: bool) -> bool {
        self.last_remote_change = Some(now);
        if is_typing {
            if self.remote.iter().any(|u| u.id == user.id) {
                return false;
            }
            self.remote.push(user);
            true
        } else {
            let before = self.remote.len();
            self.remote.retain(|u| u.id != user.id);
            before != self.remote.len()
        }
    }

    /// Advance time: fire the local debounce and the remote expiry.
    pub fn tick(&mut self, now: I) -> TypingTick {
        let mut outcome = TypingTick::default();

        if self.local_active
            && let Some(last) = self.last_local_input
            && now >= last
            && now - last >= TYPING_DEBOUNCE
        {
            self.local_active = false;
            self.last_local_input = None;
            outcome.send_stop = true;
        }

        if !self.remote.is_empty()
            && let Some(last) = self.last_remote_change
            && now >= last
            && now - last >= TYPING_EXPIRY
        {
            self.remote.clear();
            self.last_remote_change = None;
            outcome.remote_cleared = true;
        }

        outcome
    }

    /// Drop all state (thread switch or teardown).
    pub fn reset(&mut self) {
        self.remote.clear();
        self.last_remote_change = None;
        self.local_active = false;
        self.last_local_input = None;
    }
}

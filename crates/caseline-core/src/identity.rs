//! Viewer identity and message direction inference.
//!
//! Direction (own vs counter-party) is derived, never stored. The backend
//! is inconsistent about sender payloads across its surfaces, so the
//! cascade below is a compatibility shim kept isolated here: prefer the
//! authoritative `is_own` field, then sender-id comparison, then email,
//! then role heuristics. New call sites should rely on `is_own` and treat
//! the rest as legacy.

use caseline_proto::Message;

/// Role names treated as staff-side participants when nothing better is
/// available to classify a sender.
const STAFF_ROLES: &[&str] = &["staff", "preparer", "admin", "firm_admin", "support"];

/// The identity of the person looking at the thread.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Viewer {
    /// Stable user id, when known.
    pub id: Option<String>,
    /// Email address, when known.
    pub email: Option<String>,
    /// Role name, when known.
    pub role: Option<String>,
    /// Display name used for optimistic entries.
    pub name: String,
}

impl Viewer {
    /// Whether `message` was sent by this viewer.
    ///
    /// Ids are compared as strings to tolerate numeric/string mismatches
    /// between surfaces; emails case-insensitively. The role fallback
    /// classifies both sides as staff-like or not and calls them the same
    /// party when the classification matches.
    pub fn is_own(&self, message: &Message) -> bool {
        if let Some(own) = message.is_own {
            return own;
        }
        if let (Some(viewer_id), Some(sender_id)) = (&self.id, &message.sender.id) {
            return viewer_id == sender_id;
        }
        if let (Some(viewer_email), Some(sender_email)) = (&self.email, &message.sender.email) {
            return viewer_email.eq_ignore_ascii_case(sender_email);
        }
        let sender_is_staff = message.sender.role.as_deref().is_some_and(is_staff_role);
        let viewer_is_staff = self.role.as_deref().is_some_and(is_staff_role);
        sender_is_staff == viewer_is_staff
    }
}

fn is_staff_role(role: &str) -> bool {
    let role = role.to_ascii_lowercase();
    STAFF_ROLES.contains(&role.as_str())
}

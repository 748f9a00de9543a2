//! Thread and message data model.
//!
//! These are the shapes shared by the REST endpoints and the WebSocket
//! frames. Identifiers are opaque strings: the backend mixes numeric and
//! UUID-style ids across deployments, so nothing here assumes a format
//! beyond the `temp-` prefix reserved for optimistic local entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix marking a client-generated message id that has not yet been
/// confirmed by the server.
pub const LOCAL_ID_PREFIX: &str = "temp-";

/// Opaque, stable thread identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub String);

impl ThreadId {
    /// Construct from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message identifier.
///
/// Either a server-assigned durable id or a `temp-<millis>` id minted
/// locally for an optimistic entry. Server ids may be numbers on the wire;
/// they are normalized to strings on deserialization so id comparison never
/// depends on the backend's JSON number formatting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Construct from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a local id for an optimistic entry created at `created_at`.
    pub fn local(created_at: DateTime<Utc>) -> Self {
        Self(format!("{LOCAL_ID_PREFIX}{}", created_at.timestamp_millis()))
    }

    /// Whether this id was minted locally and awaits server confirmation.
    pub fn is_local(&self) -> bool {
        self.0.starts_with(LOCAL_ID_PREFIX)
    }

    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Backends disagree on whether ids are JSON numbers or strings.
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::String(s) => Ok(Self(s)),
            serde_json::Value::Number(n) => Ok(Self(n.to_string())),
            other => Err(serde::de::Error::custom(format!(
                "message id must be a string or number, got {other}"
            ))),
        }
    }
}

/// Thread lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    /// Open for new messages.
    Active,
    /// Closed; shown read-only.
    Closed,
}

/// Message sender identity as reported by the backend.
///
/// Every field except the display name is optional because the three portal
/// surfaces populate different subsets. Direction inference copes with the
/// gaps (see the identity module in the core crate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    /// Stable user id, when the backend provides one.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Role name (`client`, `preparer`, `firm_admin`, ...).
    #[serde(default)]
    pub role: Option<String>,
    /// Email address.
    #[serde(default)]
    pub email: Option<String>,
}

/// Upload state of a message attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentState {
    /// Local upload still in flight (optimistic entries only).
    Sending,
    /// Stored server-side; `url` is valid.
    Ready,
}

/// Attachment metadata carried on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Download URL. Absent until the server has stored the file, which may
    /// lag the send response itself (picked up by a follow-up fetch).
    #[serde(default)]
    pub url: Option<String>,
    /// Original file name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Upload state.
    #[serde(default = "AttachmentState::ready")]
    pub state: AttachmentState,
}

impl AttachmentState {
    fn ready() -> Self {
        Self::Ready
    }
}

/// A user-selected file to send alongside a message.
///
/// Only ever travels the REST path; the socket transport does not carry
/// binary payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    /// Original file name.
    pub name: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl AttachmentUpload {
    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// A chat message within a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Durable server id or local `temp-` id.
    pub id: MessageId,
    /// Owning thread.
    pub thread_id: ThreadId,
    /// Sender identity.
    pub sender: Sender,
    /// Body text.
    #[serde(default)]
    pub body: String,
    /// Creation timestamp; the ordering key within a thread.
    pub created_at: DateTime<Utc>,
    /// Whether the counter-party has read this message.
    #[serde(default)]
    pub read: bool,
    /// Whether the message was edited after sending.
    #[serde(default)]
    pub edited: bool,
    /// Authoritative directionality when the backend provides it. When
    /// absent, direction falls back to the sender-identity cascade.
    #[serde(default)]
    pub is_own: Option<bool>,
    /// Optional attachment.
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

impl Message {
    /// Whether this is an unconfirmed optimistic entry.
    pub fn is_local(&self) -> bool {
        self.id.is_local()
    }
}

/// A conversation summary as shown in the thread list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    /// Opaque stable id.
    pub id: ThreadId,
    /// Subject line.
    #[serde(default)]
    pub subject: String,
    /// Lifecycle status.
    pub status: ThreadStatus,
    /// Client participant display name.
    #[serde(default)]
    pub client_name: Option<String>,
    /// Assigned staff display name.
    #[serde(default)]
    pub assigned_staff: Option<String>,
    /// Counter-party participant user id, used for deep-link resolution.
    #[serde(default)]
    pub participant_id: Option<String>,
    /// Text of the most recent message.
    #[serde(default)]
    pub last_message: Option<String>,
    /// Timestamp of the most recent message.
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Thread creation timestamp. Optional because older backends omit it.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Number of unread inbound messages.
    #[serde(default)]
    pub unread_count: u32,
}

impl Thread {
    /// Recency key for list ordering: last message, then creation time,
    /// then the epoch for threads missing both.
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_message_at
            .or(self.created_at)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// Payload for creating a new thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewThread {
    /// Subject line.
    pub subject: String,
    /// First message body, when the backend supports seeding one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_message: Option<String>,
    /// Counter-party user id to open the thread with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
}

/// A message the viewer is composing.
///
/// Returned back to the caller on send failure so the compose input can be
/// restored for retry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Draft {
    /// Body text.
    pub content: String,
    /// Staff-only internal note flag.
    pub is_internal: bool,
    /// Optional file attachment.
    pub attachment: Option<AttachmentUpload>,
}

impl Draft {
    /// A plain text draft.
    pub fn text(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_internal: false, attachment: None }
    }

    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.attachment.is_none()
    }
}

//! WebSocket frame codec.
//!
//! Frames are JSON objects tagged by a `type` field. The tag names differ
//! between portal surfaces (the client portal says `message`, the staff
//! console says `thread_message`, and so on), so the codec is parameterized
//! by a [`Dialect`] table instead of hard-coding one convention per call
//! site.
//!
//! Unknown frame types are not an error: [`InboundFrame::parse`] returns
//! `Ok(None)` so a newer backend can introduce frame kinds without breaking
//! older clients.

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::model::{Message, MessageId};

/// Frame codec errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame was not valid JSON.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame had no string `type` tag.
    #[error("frame missing `type` tag")]
    MissingTag,

    /// Frame tag was recognized but the body did not match its shape.
    #[error("invalid `{tag}` frame: {source}")]
    InvalidBody {
        /// The frame tag.
        tag: String,
        /// Underlying decode error.
        source: serde_json::Error,
    },
}

/// Event-name table for one portal surface's frame convention.
///
/// The three fields are the only names that ever diverged between the
/// surfaces; everything else (`connection_established`, `typing`, `error`)
/// is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Inbound tag carrying a new chat message.
    pub message: &'static str,
    /// Inbound tag marking one or all messages as read.
    pub messages_read: &'static str,
    /// Outbound tag requesting a read-mark.
    pub mark_read: &'static str,
}

impl Dialect {
    /// Convention used by the client portal.
    pub const CLIENT_PORTAL: Self =
        Self { message: "message", messages_read: "messages_read", mark_read: "mark_read" };

    /// Convention used by the staff console and firm-admin dashboard.
    pub const STAFF_CONSOLE: Self =
        Self { message: "thread_message", messages_read: "message_read", mark_read: "read_messages" };
}

/// A frame pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Handshake acknowledgement after the socket opens.
    Established,

    /// A new durable chat message.
    Message(Message),

    /// A user started or stopped typing.
    Typing {
        /// Typing user's id.
        user_id: String,
        /// Typing user's display name.
        user_name: String,
        /// `true` on start, `false` on stop.
        is_typing: bool,
    },

    /// One message (or all, when the id is absent) was marked read.
    MessagesRead {
        /// The specific message, or `None` for the whole thread.
        message_id: Option<MessageId>,
    },

    /// Server-reported error.
    Error {
        /// Human-readable description.
        message: String,
    },
}

#[derive(Deserialize)]
struct TypingBody {
    user_id: String,
    #[serde(default)]
    user_name: String,
    is_typing: bool,
}

#[derive(Deserialize)]
struct ReadBody {
    #[serde(default)]
    message_id: Option<MessageId>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct MessageBody {
    message: Message,
}

impl InboundFrame {
    /// Decode a raw frame under the given dialect.
    ///
    /// Returns `Ok(None)` for frame types this client does not know about.
    pub fn parse(dialect: &Dialect, raw: &str) -> Result<Option<Self>, FrameError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        // Owned so the body decodes below can consume `value`.
        let Some(tag) =
            value.get("type").and_then(serde_json::Value::as_str).map(str::to_owned)
        else {
            return Err(FrameError::MissingTag);
        };

        let invalid = |tag: &str| {
            let tag = tag.to_owned();
            move |source| FrameError::InvalidBody { tag, source }
        };

        if tag == dialect.message {
            // The payload is either nested under `message` or inlined
            // alongside the tag, depending on backend version.
            let body: MessageBody = match serde_json::from_value(value.clone()) {
                Ok(body) => body,
                Err(_) => MessageBody {
                    message: serde_json::from_value(value).map_err(invalid(&tag))?,
                },
            };
            return Ok(Some(Self::Message(body.message)));
        }
        if tag == dialect.messages_read {
            let body: ReadBody = serde_json::from_value(value).map_err(invalid(&tag))?;
            return Ok(Some(Self::MessagesRead { message_id: body.message_id }));
        }

        match tag.as_str() {
            "connection_established" => Ok(Some(Self::Established)),
            "typing" => {
                let body: TypingBody = serde_json::from_value(value).map_err(invalid(&tag))?;
                Ok(Some(Self::Typing {
                    user_id: body.user_id,
                    user_name: body.user_name,
                    is_typing: body.is_typing,
                }))
            },
            "error" => {
                let body: ErrorBody = serde_json::from_value(value).map_err(invalid(&tag))?;
                Ok(Some(Self::Error { message: body.message }))
            },
            _ => Ok(None),
        }
    }
}

/// A frame the client sends over the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Send a chat message on the realtime path.
    SendMessage {
        /// Body text.
        content: String,
        /// Staff-only internal note flag.
        is_internal: bool,
    },

    /// Report the viewer's typing state.
    Typing {
        /// `true` on start, `false` on stop.
        is_typing: bool,
    },

    /// Mark one message (or all, when the id is absent) as read.
    MarkRead {
        /// The specific message, or `None` for the whole thread.
        message_id: Option<MessageId>,
    },
}

impl OutboundFrame {
    /// Encode under the given dialect.
    pub fn encode(&self, dialect: &Dialect) -> String {
        let value = match self {
            Self::SendMessage { content, is_internal } => json!({
                "type": "send_message",
                "content": content,
                "is_internal": is_internal,
            }),
            Self::Typing { is_typing } => json!({
                "type": "typing",
                "is_typing": is_typing,
            }),
            Self::MarkRead { message_id } => match message_id {
                Some(id) => json!({ "type": dialect.mark_read, "message_id": id }),
                None => json!({ "type": dialect.mark_read }),
            },
        };
        value.to_string()
    }
}

//! Wire types for the Caseline thread messaging protocol.
//!
//! The backend speaks two transports that must agree on one data model:
//!
//! - REST endpoints returning a `{success, data, message}` envelope
//! - a per-thread WebSocket pushing JSON frames tagged by a `type` field
//!
//! Historically each portal surface (client portal, staff console) grew its
//! own event-name convention for the same frames. [`Dialect`] captures that
//! divergence as a small configuration table so the rest of the stack sees a
//! single [`InboundFrame`] type.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod envelope;
mod frames;
mod model;

pub use envelope::Envelope;
pub use frames::{Dialect, FrameError, InboundFrame, OutboundFrame};
pub use model::{
    Attachment, AttachmentState, AttachmentUpload, Draft, Message, MessageId, NewThread, Sender,
    Thread, ThreadId, ThreadStatus,
};

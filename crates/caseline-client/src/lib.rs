//! Tokio runtime layer for the Caseline reconciliation client.
//!
//! `caseline-core` holds the pure state machines; this crate supplies the
//! I/O around them: a tokio-tungstenite WebSocket transport, a reqwest
//! REST client behind the [`ThreadApi`] trait, and the [`Session`] event
//! loop that drives everything with real timers.
//!
//! # Layout
//!
//! - [`Session`]: owns the state machines and runs the event loop
//! - [`ThreadApi`]: REST collaborator seam (swap in a fake for tests)
//! - [`TokenProvider`]: auth credential seam
//! - [`transport`]: channel-bridged socket task
//! - [`Endpoints`]: explicit HTTP/WS endpoint configuration

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod auth;
mod config;
mod rest;
mod session;
pub mod transport;

pub use auth::{StaticToken, TokenProvider};
pub use config::{ConfigError, Endpoints};
pub use rest::{ApiError, HttpThreadApi, ThreadApi};
pub use session::{Session, SessionCommand, SessionConfig, SessionHandles, SessionUpdate};

//! Endpoint configuration.
//!
//! Both bases are required at construction. There is no default host: a
//! baked-in fallback server hides missing configuration behind a
//! working-looking screen.

use caseline_proto::ThreadId;
use thiserror::Error;
use url::Url;

/// Endpoint configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A base URL could not be parsed.
    #[error("invalid {which} base url: {source}")]
    InvalidBase {
        /// Which base was malformed (`http` or `ws`).
        which: &'static str,
        /// Underlying parse error.
        source: url::ParseError,
    },

    /// The WebSocket base must use a `ws`/`wss` scheme.
    #[error("ws base must use ws:// or wss://, got {0}")]
    NotWebSocket(String),
}

/// Where the backend lives.
#[derive(Debug, Clone)]
pub struct Endpoints {
    http_base: Url,
    ws_base: Url,
    /// Path segment naming the thread kind in socket URLs
    /// (`/ws/<kind>/<id>/`); differs per portal surface.
    thread_kind: String,
}

impl Endpoints {
    /// Parse and validate endpoint bases.
    pub fn new(
        http_base: &str,
        ws_base: &str,
        thread_kind: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let http_base = Url::parse(http_base)
            .map_err(|source| ConfigError::InvalidBase { which: "http", source })?;
        let ws_base = Url::parse(ws_base)
            .map_err(|source| ConfigError::InvalidBase { which: "ws", source })?;
        if !matches!(ws_base.scheme(), "ws" | "wss") {
            return Err(ConfigError::NotWebSocket(ws_base.scheme().to_owned()));
        }
        Ok(Self { http_base, ws_base, thread_kind: thread_kind.into() })
    }

    /// REST URL for the given path segments under the API base.
    pub fn api_url(&self, segments: &[&str]) -> Url {
        let mut url = self.http_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Socket URL for a thread: `<ws>/ws/<kind>/<id>/?token=<token>`.
    pub fn socket_url(&self, thread: &ThreadId, token: &str) -> Url {
        let mut url = self.ws_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["ws", self.thread_kind.as_str(), thread.as_str(), ""]);
        }
        url.query_pairs_mut().append_pair("token", token);
        url
    }
}

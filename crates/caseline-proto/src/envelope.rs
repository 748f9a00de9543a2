//! REST response envelope.

use serde::{Deserialize, Serialize};

/// The `{success, data, message}` envelope every REST endpoint responds
/// with, including error responses (which set `success: false` and carry a
/// human-readable `message`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload; present on success. The explicit default path keeps the
    /// derive from requiring `T: Default`.
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    /// Human-readable status or error description.
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// Unwrap into the payload, or the server's rejection message.
    ///
    /// A `success: true` envelope with no `data` is treated as a rejection:
    /// it means the endpoint and client disagree on the response shape.
    pub fn into_data(self) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (true, None) => Err("response envelope missing data".to_owned()),
            (false, _) => Err(self.message.unwrap_or_else(|| "request rejected".to_owned())),
        }
    }

    /// For endpoints with no payload: succeed or surface the rejection.
    pub fn into_ack(self) -> Result<(), String> {
        if self.success {
            Ok(())
        } else {
            Err(self.message.unwrap_or_else(|| "request rejected".to_owned()))
        }
    }
}

//! REST collaborator.
//!
//! [`ThreadApi`] is the seam the session talks through; [`HttpThreadApi`]
//! is the reqwest-backed production implementation. Tests swap in an
//! in-memory fake. Every endpoint responds with the
//! `{success, data, message}` envelope, including error statuses.

use std::sync::Arc;

use async_trait::async_trait;
use caseline_core::ClientError;
use caseline_proto::{Draft, Envelope, Message, MessageId, NewThread, Thread, ThreadId};
use serde_json::json;
use thiserror::Error;

use crate::auth::TokenProvider;
use crate::config::Endpoints;

/// REST request errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No token available, or the server rejected the credential.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network-level failure (DNS, connect, timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The server answered with `success: false`.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ApiError {
    /// Map into the client error taxonomy.
    pub fn into_client_error(self) -> ClientError {
        match self {
            Self::Auth(msg) => ClientError::Auth(msg),
            Self::Network(err) => ClientError::Transport(err.to_string()),
            Self::Rejected(msg) => ClientError::Transport(msg),
        }
    }
}

/// The thread/message REST API consumed by the session.
#[async_trait]
pub trait ThreadApi: Send + Sync {
    /// All threads visible to the viewer.
    async fn list_threads(&self) -> Result<Vec<Thread>, ApiError>;

    /// One page of a thread's messages, oldest first.
    async fn get_messages(
        &self,
        thread: &ThreadId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Message>, ApiError>;

    /// Send a message (the only path that carries attachments). Returns
    /// the server-confirmed message.
    async fn send_message(&self, thread: &ThreadId, draft: &Draft) -> Result<Message, ApiError>;

    /// Create a thread.
    async fn create_thread(&self, new: &NewThread) -> Result<Thread, ApiError>;

    /// Delete a thread.
    async fn delete_thread(&self, thread: &ThreadId) -> Result<(), ApiError>;

    /// Mark one message (or all, when the id is absent) read.
    async fn mark_read(
        &self,
        thread: &ThreadId,
        message: Option<&MessageId>,
    ) -> Result<(), ApiError>;
}

/// reqwest-backed [`ThreadApi`].
pub struct HttpThreadApi {
    http: reqwest::Client,
    endpoints: Endpoints,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpThreadApi {
    /// Build against the given endpoints and token source.
    pub fn new(endpoints: Endpoints, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { http: reqwest::Client::new(), endpoints, tokens }
    }

    fn bearer(&self) -> Result<String, ApiError> {
        self.tokens
            .access_token()
            .map(|token| format!("Bearer {token}"))
            .ok_or_else(|| ApiError::Auth("no access token".into()))
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth("token rejected".into()));
        }
        let envelope: Envelope<T> = response.json().await?;
        envelope.into_data().map_err(ApiError::Rejected)
    }

    async fn decode_ack(response: reqwest::Response) -> Result<(), ApiError> {
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth("token rejected".into()));
        }
        let envelope: Envelope<serde_json::Value> = response.json().await?;
        envelope.into_ack().map_err(ApiError::Rejected)
    }
}

#[async_trait]
impl ThreadApi for HttpThreadApi {
    async fn list_threads(&self) -> Result<Vec<Thread>, ApiError> {
        let response = self
            .http
            .get(self.endpoints.api_url(&["threads"]))
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_messages(
        &self,
        thread: &ThreadId,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Message>, ApiError> {
        let response = self
            .http
            .get(self.endpoints.api_url(&["threads", thread.as_str(), "messages"]))
            .query(&[("page", page), ("page_size", page_size)])
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn send_message(&self, thread: &ThreadId, draft: &Draft) -> Result<Message, ApiError> {
        let url = self.endpoints.api_url(&["threads", thread.as_str(), "messages"]);
        let request = self.http.post(url).header(reqwest::header::AUTHORIZATION, self.bearer()?);

        let response = match &draft.attachment {
            // Attachments go multipart; the socket transport never
            // carries them.
            Some(upload) => {
                let form = reqwest::multipart::Form::new()
                    .text("content", draft.content.clone())
                    .text("message_type", "text")
                    .text("is_internal", draft.is_internal.to_string())
                    .part(
                        "attachment",
                        reqwest::multipart::Part::bytes(upload.bytes.clone())
                            .file_name(upload.name.clone()),
                    );
                request.multipart(form).send().await?
            },
            None => {
                request
                    .json(&json!({
                        "content": draft.content,
                        "message_type": "text",
                        "is_internal": draft.is_internal,
                    }))
                    .send()
                    .await?
            },
        };
        Self::decode(response).await
    }

    async fn create_thread(&self, new: &NewThread) -> Result<Thread, ApiError> {
        let response = self
            .http
            .post(self.endpoints.api_url(&["threads"]))
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .json(new)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn delete_thread(&self, thread: &ThreadId) -> Result<(), ApiError> {
        let response = self
            .http
            .delete(self.endpoints.api_url(&["threads", thread.as_str()]))
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        Self::decode_ack(response).await
    }

    async fn mark_read(
        &self,
        thread: &ThreadId,
        message: Option<&MessageId>,
    ) -> Result<(), ApiError> {
        let body = match message {
            Some(id) => json!({ "message_id": id }),
            None => json!({}),
        };
        let response = self
            .http
            .post(self.endpoints.api_url(&["threads", thread.as_str(), "read"]))
            .header(reqwest::header::AUTHORIZATION, self.bearer()?)
            .json(&body)
            .send()
            .await?;
        Self::decode_ack(response).await
    }
}

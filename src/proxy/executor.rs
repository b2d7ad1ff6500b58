use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

/// A fully composed outbound request.
///
/// `headers` is a JSON array of `{key, value}` objects. `body` is text whose
/// shape depends on `content_type`: verbatim text for JSON and other MIME types,
/// a JSON array of `{key, value}` fields for url-encoded and multipart bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorResponse {
    /// `"<code> <reason>"`, e.g. `"200 OK"`.
    pub status: String,
    /// UTF-8 body text, or a base64 data URI for images.
    pub data: String,
    pub headers: Map<String, Value>,
}

impl ExecutorResponse {
    pub fn status_code(&self) -> Option<u16> {
        self.status.split_whitespace().next()?.parse().ok()
    }

    pub fn is_success(&self) -> bool {
        self.status_code().is_some_and(|code| (200..300).contains(&code))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Rejected(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Transport(String),
}

/// Sends one request on behalf of the caller. Implementations must return
/// [`ExecutorError::Cancelled`] promptly once `cancel` fires.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(
        &self,
        request: &OutboundRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutorResponse, ExecutorError>;
}

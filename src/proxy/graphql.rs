use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ExecutorError, ExecutorResponse, OutboundRequest};

/// A GraphQL request as the client sends it. `body` is the query document
/// (`{query, variables, operationName}`), either as an object or as JSON text.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub headers: String,
    #[serde(default)]
    pub body: Value,
    #[serde(default)]
    pub content_type: String,
}

impl GraphqlRequest {
    /// Only `application/json` carries a body; it must be valid JSON. Any other
    /// content type sends the request without one. The method defaults to POST.
    pub fn into_outbound(self) -> Result<OutboundRequest, ExecutorError> {
        let invalid_body = || ExecutorError::InvalidRequest("Invalid request body format".into());

        let (body, content_type) = if self.content_type == "application/json" {
            let body = match self.body {
                Value::String(text) => {
                    serde_json::from_str::<Value>(&text).map_err(|_| invalid_body())?;
                    text
                }
                Value::Null => return Err(invalid_body()),
                other => other.to_string(),
            };
            (body, self.content_type)
        } else {
            (String::new(), String::new())
        };

        let method = match self.method.trim() {
            "" => "POST".to_string(),
            method => method.to_uppercase(),
        };

        Ok(OutboundRequest {
            url: self.url,
            method,
            headers: self.headers,
            body,
            content_type,
        })
    }
}

/// Executor response with `data` decoded when the server answered with JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphqlResponse {
    pub status: String,
    pub data: Value,
    pub headers: Map<String, Value>,
}

impl From<ExecutorResponse> for GraphqlResponse {
    fn from(response: ExecutorResponse) -> Self {
        let data = serde_json::from_str(&response.data).unwrap_or(Value::String(response.data));
        Self {
            status: response.status,
            data,
            headers: response.headers,
        }
    }
}

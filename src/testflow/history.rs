use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RequestData;

/// Status recorded for a node whose dispatch produced no HTTP response.
pub const FAILED_STATUS: &str = "Not Found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseContentType {
    #[serde(rename = "JSON")]
    Json,
    #[serde(rename = "XML")]
    Xml,
    #[serde(rename = "HTML")]
    Html,
    Text,
    JavaScript,
    Image,
}

/// Classify a response by its first `content-type` header.
pub fn classify_content_type(headers: &[Header]) -> ResponseContentType {
    let Some(header) = headers.iter().find(|h| h.key.eq_ignore_ascii_case("content-type")) else {
        return ResponseContentType::Text;
    };
    let value = header.value.as_str();
    if value.contains("text/html") {
        ResponseContentType::Html
    } else if value.contains("application/json") || value.contains("application/hal+json") {
        ResponseContentType::Json
    } else if value.contains("application/xml") {
        ResponseContentType::Xml
    } else if value.contains("application/javascript") {
        ResponseContentType::JavaScript
    } else if value.starts_with("image/") {
        ResponseContentType::Image
    } else {
        ResponseContentType::Text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest {
    pub method: String,
    pub name: String,
    pub status: String,
    /// Humanized elapsed time, e.g. `"120 ms"`.
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub headers: Vec<Header>,
    pub status: String,
    pub body: String,
    /// Elapsed milliseconds.
    pub time: u64,
    /// Kilobytes.
    pub size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_content_type: Option<ResponseContentType>,
}

impl HistoryResponse {
    pub fn failed(message: impl Into<String>, time: u64) -> Self {
        Self {
            headers: Vec::new(),
            status: FAILED_STATUS.to_string(),
            body: message.into(),
            time,
            size: 0.0,
            response_content_type: None,
        }
    }
}

/// One processed request node, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutedNode {
    pub id: String,
    pub request: RequestData,
    pub response: HistoryResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunHistory {
    pub status: RunStatus,
    pub success_requests: usize,
    pub failed_requests: usize,
    pub total_time: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub requests: Vec<HistoryRequest>,
    pub responses: Vec<HistoryResponse>,
}

impl RunHistory {
    pub fn new(created_by: Option<String>) -> Self {
        Self {
            status: RunStatus::Fail,
            success_requests: 0,
            failed_requests: 0,
            total_time: String::new(),
            created_at: Utc::now(),
            created_by,
            requests: Vec::new(),
            responses: Vec::new(),
        }
    }

    /// Append one node's entries and count it as passed or failed.
    pub fn record(&mut self, passed: bool, request: HistoryRequest, response: Option<HistoryResponse>) {
        if passed {
            self.success_requests += 1;
        } else {
            self.failed_requests += 1;
        }
        self.requests.push(request);
        self.responses.extend(response);
    }

    pub fn finish(&mut self, total_ms: u64) {
        self.total_time = humanize_duration(total_ms);
        self.status = if self.failed_requests == 0 {
            RunStatus::Pass
        } else {
            RunStatus::Fail
        };
    }
}

/// `"<n> ms"` below a second, `"<s.ss> s"` below a minute, `"<m> min <s> s"` beyond.
pub fn humanize_duration(ms: u64) -> String {
    match ms {
        0..1_000 => format!("{ms} ms"),
        1_000..60_000 => format!("{:.2} s", ms as f64 / 1000.0),
        _ => format!("{} min {} s", ms / 60_000, (ms % 60_000) / 1000),
    }
}

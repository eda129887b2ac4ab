use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::CallKind;
use crate::error::HostResult;

/// A value crossing the worker boundary. Producers may hand over JSON,
/// text, or raw bytes; consumers that need a buffer normalize through
/// [`Payload::into_bytes`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    #[default]
    Empty,
    Json(Value),
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Canonical byte-buffer form. JSON payloads are serialized; binary
    /// payloads pass through untouched, whatever their origin.
    pub fn into_bytes(self) -> HostResult<Bytes> {
        match self {
            Payload::Empty => Ok(Bytes::new()),
            Payload::Json(value) => Ok(serde_json::to_vec(&value)?.into()),
            Payload::Text(text) => Ok(Bytes::from(text)),
            Payload::Binary(bytes) => Ok(bytes),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes.into())
    }
}

/// Transport-agnostic view of an inbound request. The gateway fills
/// `params` from route matching before the request reaches a handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
}

impl RequestSnapshot {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Payload>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(x, _)| x.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Mutable response state a handler can adjust before (or while)
/// producing a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
}

impl ResponseSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Sets a header, replacing any previous value under the same name.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(x, _)| !x.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(x, _)| x.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl Default for ResponseSnapshot {
    fn default() -> Self {
        Self {
            status: 200,
            message: None,
            headers: vec![],
        }
    }
}

/// Per-kind call arguments delivered to a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallParams {
    Http {
        request: RequestSnapshot,
        response: ResponseSnapshot,
    },
    WebSocket {
        request: RequestSnapshot,
        frame: Payload,
    },
    Rpc(Payload),
}

impl CallParams {
    pub fn kind(&self) -> CallKind {
        match self {
            CallParams::Http { .. } => CallKind::Http,
            CallParams::WebSocket { .. } => CallKind::WebSocket,
            CallParams::Rpc(_) => CallKind::Rpc,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_payload_normalization() {
        let json = Payload::from(json!({"a": 1}));
        assert_eq!(json.into_bytes().unwrap(), Bytes::from(r#"{"a":1}"#));
        let text = Payload::from("chunk");
        assert_eq!(text.into_bytes().unwrap(), Bytes::from("chunk"));
        let binary = Payload::from(vec![0u8, 159, 146, 150]);
        assert_eq!(
            binary.into_bytes().unwrap(),
            Bytes::from(vec![0u8, 159, 146, 150])
        );
        assert_eq!(Payload::Empty.into_bytes().unwrap(), Bytes::new());
    }

    #[test]
    fn test_request_headers_case_insensitive() {
        let request = RequestSnapshot::new("GET", "/x")
            .with_header("Content-Type", "application/json")
            .with_header("X-Trace", "1");
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("missing"), None);
    }

    #[test]
    fn test_response_header_replacement() {
        let mut response = ResponseSnapshot::new();
        assert_eq!(response.status, 200);
        response.set_header("Content-Type", "text/plain");
        response.set_header("content-type", "application/json");
        assert_eq!(response.headers.len(), 1);
        assert_eq!(response.header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn test_call_params_kind() {
        let params = CallParams::WebSocket {
            request: RequestSnapshot::new("GET", "/chat"),
            frame: Payload::from("ping"),
        };
        assert_eq!(params.kind(), CallKind::WebSocket);
        assert_eq!(CallParams::Rpc(Payload::Empty).kind(), CallKind::Rpc);
    }
}

use serde::{Deserialize, Serialize};

use crate::app::{AppName, CallKind, HandlerManifest};
use crate::error::ErrorDescription;
use crate::id::ExecuteId;
use crate::transport::{CallParams, Payload, RequestSnapshot, ResponseSnapshot};

/// Message envelope crossing the worker boundary, in either direction.
/// The envelope stream is the entire contract between the two halves of
/// a worker; no other state crosses the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Envelope {
    /// First message of a healthy worker, carrying its declared handlers.
    Init(InitBody),
    Execute(ExecuteBody),
    Result(ResultBody),
    Error(ErrorBody),
    Config(ConfigBody),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitBody {
    pub handlers: HandlerManifest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteBody {
    pub app: AppName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    pub execute_id: ExecuteId,
    pub kind: CallKind,
    pub params: CallParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBody {
    pub execute_id: ExecuteId,
    pub kind: CallKind,
    pub result: CallResult,
}

/// Payload of a `result` envelope. `is_stream` marks chunked responses;
/// the terminal message of a stream has `is_complete` set and carries no
/// further data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
    #[serde(default)]
    pub data: Payload,
    pub is_complete: bool,
    #[serde(default)]
    pub is_stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSnapshot>,
}

impl CallResult {
    pub fn complete(data: Payload) -> Self {
        Self {
            data,
            is_complete: true,
            is_stream: false,
            request: None,
            response: None,
        }
    }

    pub fn stream_chunk(data: Payload) -> Self {
        Self {
            data,
            is_complete: false,
            is_stream: true,
            request: None,
            response: None,
        }
    }

    pub fn stream_end() -> Self {
        Self {
            data: Payload::Empty,
            is_complete: true,
            is_stream: true,
            request: None,
            response: None,
        }
    }

    pub fn with_transport(
        mut self,
        request: Option<RequestSnapshot>,
        response: Option<ResponseSnapshot>,
    ) -> Self {
        self.request = request;
        self.response = response;
        self
    }
}

/// An error crossing the boundary. `execute_id` correlates the error to
/// a call; without one the error concerns the worker itself, such as a
/// failed application load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute_id: Option<ExecuteId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CallKind>,
    pub error: ErrorDescription,
}

/// A `config` envelope with no handlers asks the worker for its declared
/// handler map; the worker answers with the map filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handlers: Option<HandlerManifest>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::app::{HandlerDeclaration, HttpMethod};

    #[test]
    fn test_envelope_wire_shape() {
        let envelope = Envelope::Execute(ExecuteBody {
            app: "billing".into(),
            handler: Some("charge".to_string()),
            execute_id: ExecuteId::generate(),
            kind: CallKind::Rpc,
            params: CallParams::Rpc(Payload::from(json!({"amount": 5}))),
        });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "execute");
        assert_eq!(value["data"]["app"], "billing");
        assert_eq!(value["data"]["kind"], "rpc");
        let decoded: Envelope = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_init_envelope_round_trip() {
        let manifest = HandlerManifest::new(vec![
            HandlerDeclaration::http("list", HttpMethod::Get).with_route("/items"),
            HandlerDeclaration::rpc("charge"),
        ]);
        let envelope = Envelope::Init(InitBody { handlers: manifest });
        let text = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_error_envelope_omits_missing_correlation() {
        let envelope = Envelope::Error(ErrorBody {
            execute_id: None,
            kind: None,
            error: ErrorDescription::new("InitError", "no entry file"),
        });
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "error");
        assert!(value["data"].get("execute_id").is_none());
        assert_eq!(value["data"]["error"]["name"], "InitError");
    }

    #[test]
    fn test_stream_result_markers() {
        let chunk = CallResult::stream_chunk(Payload::from("c1"));
        assert!(chunk.is_stream);
        assert!(!chunk.is_complete);
        let end = CallResult::stream_end();
        assert!(end.is_stream);
        assert!(end.is_complete);
        assert!(end.data.is_empty());
    }
}

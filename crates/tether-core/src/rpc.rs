use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version, the only one accepted on the wire.
pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC error codes.
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// Server-defined code for session-level rejections ("Bad Request: ...").
pub const BAD_REQUEST: i32 = -32000;

/// JSON-RPC 2.0 request or notification.
///
/// A message without an `id` (or with a null one) is a notification and
/// never receives a response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        match &self.id {
            None => true,
            Some(v) => v.is_null(),
        }
    }

    /// True for the handshake's type discriminant: an `initialize` request
    /// proper, not an `initialize` notification.
    pub fn is_initialize(&self) -> bool {
        self.method == "initialize" && !self.is_notification()
    }
}

/// JSON-RPC 2.0 response. `id` serializes even when null, matching the
/// transport-level error envelopes this server emits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    pub id: Value,
}

/// JSON-RPC 2.0 error object.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id: id.unwrap_or(Value::Null),
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
            id: id.unwrap_or(Value::Null),
        }
    }

    /// The session rejection envelope, byte-for-byte:
    /// `{"jsonrpc":"2.0","error":{"code":-32000,"message":"Bad Request: No valid session ID provided"},"id":null}`
    pub fn invalid_session() -> Self {
        Self::error(None, BAD_REQUEST, "Bad Request: No valid session ID provided")
    }

    /// The transport-level fault envelope, byte-for-byte:
    /// `{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal server error"},"id":null}`
    pub fn internal_error() -> Self {
        Self::error(None, INTERNAL_ERROR, "Internal server error")
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        let mut resp = Self::error(None, PARSE_ERROR, "Parse error");
        if let Some(err) = resp.error.as_mut() {
            err.data = Some(Value::String(detail.into()));
        }
        resp
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::error(None, INVALID_REQUEST, message)
    }

    pub fn method_not_found(id: Option<Value>, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }
}

/// A POST body: one JSON-RPC message or a batch of them.
#[derive(Clone, Debug)]
pub enum RpcPayload {
    Single(JsonRpcRequest),
    Batch(Vec<JsonRpcRequest>),
}

impl RpcPayload {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(body)?;
        if value.is_array() {
            Ok(Self::Batch(serde_json::from_value(value)?))
        } else {
            Ok(Self::Single(serde_json::from_value(value)?))
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    pub fn messages(&self) -> &[JsonRpcRequest] {
        match self {
            Self::Single(req) => std::slice::from_ref(req),
            Self::Batch(reqs) => reqs,
        }
    }

    pub fn into_messages(self) -> Vec<JsonRpcRequest> {
        match self {
            Self::Single(req) => vec![req],
            Self::Batch(reqs) => reqs,
        }
    }

    pub fn contains_initialize(&self) -> bool {
        self.messages().iter().any(JsonRpcRequest::is_initialize)
    }

    /// True when at least one message expects a response.
    pub fn has_requests(&self) -> bool {
        self.messages().iter().any(|m| !m.is_notification())
    }
}

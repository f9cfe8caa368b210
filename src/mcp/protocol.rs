//! JSON-RPC 2.0 message shapes used on every transport.
//!
//! Inbound bodies are first parsed into a loose [`serde_json::Value`] so
//! that parse failures, batches, and shape violations can be told apart
//! and mapped to distinct error codes. Outbound messages are strongly
//! typed and carry exactly one of `result` or `error`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version literal carried in every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32_700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i32 = -32_600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i32 = -32_601;
/// Tool lookup or invocation failed.
pub const EXECUTION_ERROR: i32 = -32_000;

/// Validated inbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMessage {
    /// Correlation token; `Value::Null` when absent.
    pub id: Value,
    /// Method name.
    pub method: String,
    /// Named parameters; empty when absent or `null`.
    pub params: Map<String, Value>,
}

/// Why an inbound body could not become a [`CallMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Body is not valid JSON.
    Parse(String),
    /// Body is a JSON array; batches are not supported.
    Batch,
    /// Body is JSON but not a JSON-RPC 2.0 request. Carries the `id`
    /// recovered from the partial object, or `null`.
    InvalidRequest {
        /// Correlation token from the partial object.
        id: Value,
        /// Human-readable reason.
        reason: String,
    },
}

impl ProtocolError {
    /// JSON-RPC error object for this failure.
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::Parse(_) => RpcError::parse_error(),
            Self::Batch | Self::InvalidRequest { .. } => RpcError::invalid_request(),
        }
    }

    /// Correlation token a JSON-RPC error response must echo.
    #[must_use]
    pub fn id(&self) -> Value {
        match self {
            Self::InvalidRequest { id, .. } => id.clone(),
            Self::Parse(_) | Self::Batch => Value::Null,
        }
    }
}

impl CallMessage {
    /// Parse and validate a raw request body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Parse`] for invalid JSON,
    /// [`ProtocolError::Batch`] for arrays, and
    /// [`ProtocolError::InvalidRequest`] for any other shape violation.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|err| ProtocolError::Parse(err.to_string()))?;
        Self::from_value(value)
    }

    /// Validate an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// See [`CallMessage::parse`].
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let mut object = match value {
            Value::Object(object) => object,
            Value::Array(_) => return Err(ProtocolError::Batch),
            _ => {
                return Err(ProtocolError::InvalidRequest {
                    id: Value::Null,
                    reason: "request must be a JSON object".into(),
                })
            }
        };

        let id = object.remove("id").unwrap_or(Value::Null);
        let invalid = |reason: &str| ProtocolError::InvalidRequest {
            id: id.clone(),
            reason: reason.to_owned(),
        };

        if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(invalid("jsonrpc must be \"2.0\""));
        }

        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            Some(_) => return Err(invalid("method must be a string")),
            None => return Err(invalid("method is required")),
        };

        let params = match object.remove("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(params)) => params,
            Some(_) => return Err(invalid("params must be an object")),
        };

        Ok(Self { id, method, params })
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

impl RpcError {
    /// Construct an error with an arbitrary code.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// `-32700 Parse error`.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    /// `-32600 Invalid Request`.
    #[must_use]
    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid Request")
    }

    /// `-32601 Method not found`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// `-32000` execution error carrying the failure reason verbatim.
    #[must_use]
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(EXECUTION_ERROR, message)
    }
}

/// Outcome half of a response: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    /// Successful result value.
    Result(Value),
    /// Error object.
    Error(RpcError),
}

/// Outbound JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echo of the originating call's `id`, `null` included.
    pub id: Value,
    /// Result or error.
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl ResponseMessage {
    /// Successful response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    /// Error response.
    #[must_use]
    pub fn error(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    /// Error response for a body that never became a call.
    #[must_use]
    pub fn from_protocol_error(err: &ProtocolError) -> Self {
        Self::error(err.id(), err.to_rpc_error())
    }

    /// The error object, if this is an error response.
    #[must_use]
    pub fn rpc_error(&self) -> Option<&RpcError> {
        match &self.payload {
            ResponsePayload::Error(err) => Some(err),
            ResponsePayload::Result(_) => None,
        }
    }

    /// Serialize into a JSON value for framing.
    #[must_use]
    pub fn to_value(&self) -> Value {
        // Serializing plain data with string keys cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Capability advertisement for one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool name used in `tools/call`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's `arguments`.
    pub input_schema: Value,
}

/// One element of a tool invocation result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    /// Structured JSON payload.
    Json {
        /// The payload.
        json: Value,
    },
    /// Plain-text payload.
    Text {
        /// The text.
        text: String,
    },
}

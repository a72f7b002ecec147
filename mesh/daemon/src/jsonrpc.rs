//! JSON-RPC 2.0 Messages
//!
//! The subset of JSON-RPC the stdio server needs: ids that round-trip their
//! original type, response and error objects, and classification of incoming
//! lines into requests and notifications.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Protocol version string
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters
pub const INVALID_PARAMS: i64 = -32602;

// ============================================================================
// Request Id
// ============================================================================

/// Request id, echoed back with the type it arrived with
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonRpcId {
    /// Integer id
    Number(i64),
    /// String id
    String(String),
    /// Explicit `null`
    Null,
}

impl JsonRpcId {
    /// Id from a JSON value; floats, booleans, arrays and objects are rejected
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Null => Some(Self::Null),
            _ => None,
        }
    }
}

impl std::fmt::Display for JsonRpcId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Null => f.write_str("null"),
        }
    }
}

impl Serialize for JsonRpcId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(n) => serializer.serialize_i64(*n),
            Self::String(s) => serializer.serialize_str(s),
            Self::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).ok_or_else(|| {
            serde::de::Error::custom("JSON-RPC id must be a string, an integer or null")
        })
    }
}

// ============================================================================
// Incoming Messages
// ============================================================================

/// A classified incoming line
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Expects a response
    Request {
        /// Request id
        id: JsonRpcId,
        /// Method name
        method: String,
        /// Parameters, `null` when absent
        params: Value,
    },
    /// Fire-and-forget
    Notification {
        /// Method name
        method: String,
        /// Parameters, `null` when absent
        params: Value,
    },
}

/// Why a line could not be classified, with the id to answer to
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    /// Id to echo, `None` when it could not be determined
    pub id: Option<JsonRpcId>,
    /// Error to answer with
    pub error: JsonRpcError,
}

/// Parse and classify one line
///
/// # Errors
///
/// Returns a [`Rejected`] carrying a parse error or invalid-request error.
pub fn parse_line(line: &str) -> Result<Incoming, Rejected> {
    let value: Value = serde_json::from_str(line).map_err(|e| Rejected {
        id: None,
        error: JsonRpcError::new(PARSE_ERROR, format!("Parse error: {e}")),
    })?;

    let id = match value.get("id") {
        None => None,
        Some(raw) => match JsonRpcId::from_value(raw) {
            Some(id) => Some(id),
            None => {
                return Err(Rejected {
                    id: None,
                    error: JsonRpcError::new(INVALID_REQUEST, "Invalid request: bad id"),
                })
            }
        },
    };

    let invalid = |reason: &str| Rejected {
        id: id.clone(),
        error: JsonRpcError::new(INVALID_REQUEST, format!("Invalid request: {reason}")),
    };

    if value.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(invalid("jsonrpc must be \"2.0\""));
    }
    let Some(method) = value.get("method").and_then(Value::as_str) else {
        return Err(invalid("missing method"));
    };
    let params = value.get("params").cloned().unwrap_or(Value::Null);

    Ok(match id {
        Some(id) => Incoming::Request {
            id,
            method: method.to_string(),
            params,
        },
        None => Incoming::Notification {
            method: method.to_string(),
            params,
        },
    })
}

// ============================================================================
// Outgoing Messages
// ============================================================================

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,
    /// Short description
    pub message: String,
    /// Extra detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Error without data
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0"
    pub jsonrpc: String,
    /// Request id; serialized as `null` when unknown
    pub id: Option<JsonRpcId>,
    /// Result (mutually exclusive with error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (mutually exclusive with result)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Success response
    #[must_use]
    pub fn success(id: JsonRpcId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Error response
    #[must_use]
    pub fn error(id: Option<JsonRpcId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

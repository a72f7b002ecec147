//! Mesh Calls and Results
//!
//! A [`MeshCall`] names a role and carries an opaque payload. Every call ends
//! in exactly one [`MeshResult`]: success, degraded (backend known to be down),
//! or error (the call was attempted or rejected).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One request routed by the mesh
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshCall {
    /// Correlation id, unique per call
    pub call_id: String,
    /// Target role
    pub role: String,
    /// Opaque payload, interpreted only by the provider adapter
    pub payload: Value,
}

impl MeshCall {
    /// New call with a fresh correlation id
    pub fn new(role: impl Into<String>, payload: Value) -> Self {
        Self {
            call_id: Uuid::new_v4().to_string(),
            role: role.into(),
            payload,
        }
    }

    /// Use a caller-supplied correlation id
    #[must_use]
    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = call_id.into();
        self
    }
}

/// Why a call failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Role is not configured
    UnknownRole,
    /// Connection to the backend failed
    BackendUnreachable,
    /// Backend did not answer in time
    BackendTimeout,
    /// Backend answered with something unusable
    BackendProtocolError,
    /// Payload or arguments were malformed
    InvalidRequest,
    /// Tool name not exposed by this surface
    UnknownTool,
}

impl ErrorKind {
    /// Snake-case name, as serialized
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownRole => "unknown_role",
            Self::BackendUnreachable => "backend_unreachable",
            Self::BackendTimeout => "backend_timeout",
            Self::BackendProtocolError => "backend_protocol_error",
            Self::InvalidRequest => "invalid_request",
            Self::UnknownTool => "unknown_tool",
        }
    }

    /// Failures that say the backend itself is gone
    #[must_use]
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::BackendUnreachable | Self::BackendTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one mesh call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MeshResult {
    /// Backend answered; value is the adapter's normalized response
    Success {
        /// Response value
        value: Value,
    },
    /// Backend known unavailable; no call was attempted
    Degraded {
        /// Why the role is unavailable
        reason: String,
    },
    /// Call was rejected or failed
    Error {
        /// Failure category
        kind: ErrorKind,
        /// Human-readable message
        message: String,
    },
}

impl MeshResult {
    /// Success with a value
    #[must_use]
    pub fn success(value: Value) -> Self {
        Self::Success { value }
    }

    /// Degraded with a reason
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self::Degraded {
            reason: reason.into(),
        }
    }

    /// Error of a kind
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    /// Whether the call succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Whether the call was short-circuited as degraded
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }

    /// Error kind, if this is an error
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// `success`, `degraded` or `error`
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Degraded { .. } => "degraded",
            Self::Error { .. } => "error",
        }
    }
}

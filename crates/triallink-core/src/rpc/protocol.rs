//! Wire types for the line-delimited JSON protocol
//!
//! Requests are `{"id": ..., "method": ..., "params": {...}}`; responses
//! carry the matching id and exactly one of `result` or `error`. Anything
//! else on the channel is noise and is dropped by the reader loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{Result, RpcError};

/// Outbound unit of work. Immutable once sent.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Serialize to a single wire line (no trailing newline).
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RpcError::Internal {
            reason: format!("failed to serialize request: {}", e),
        })
    }
}

/// Inbound reply, already validated to carry result XOR error.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub outcome: std::result::Result<Value, ErrorPayload>,
}

/// Error descriptor reported by the child, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

/// Remote error codes may be numeric or textual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::Number(n) => write!(f, "{}", n),
            ErrorCode::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Parse one line from the child. Returns `None` for anything that is not a
/// well-formed response: invalid JSON, missing/non-string id, or a body that
/// does not carry exactly one of `result` / `error`. Callers log and discard.
pub fn parse_response(line: &str) -> Option<Response> {
    let value: Value = serde_json::from_str(line).ok()?;
    let obj = value.as_object()?;

    let id = obj.get("id")?.as_str()?;
    if id.is_empty() {
        return None;
    }

    // result XOR error, never both, never neither
    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");
    if has_result == has_error {
        return None;
    }

    let outcome = if has_result {
        Ok(obj.get("result").cloned().unwrap_or(Value::Null))
    } else {
        let payload: ErrorPayload = serde_json::from_value(obj.get("error").cloned()?).ok()?;
        Err(payload)
    };

    Some(Response {
        id: id.to_string(),
        outcome,
    })
}

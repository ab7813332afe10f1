//! Error taxonomy for the tool-invocation client
//!
//! Transport failures (`TransportClosed`) are fatal to the session; per-call
//! timeouts are local to the call; validation failures never reach the child.

use thiserror::Error;

use super::protocol::ErrorCode;

pub type Result<T> = std::result::Result<T, RpcError>;

#[derive(Debug, Error)]
pub enum RpcError {
    /// The external program could not be spawned. Not retried automatically.
    #[error("failed to launch '{command}': {reason}")]
    Launch { command: String, reason: String },

    /// Catalog discovery did not complete in time. Retryable by the caller.
    #[error("handshake did not complete within {elapsed_ms}ms")]
    HandshakeTimeout { elapsed_ms: u64 },

    /// A blocking read on the child's stdout exceeded its deadline.
    #[error("read from child process timed out after {elapsed_ms}ms")]
    ReadTimeout { elapsed_ms: u64 },

    /// One call exceeded its deadline. The session remains usable.
    #[error("call '{method}' (id {id}) timed out after {elapsed_ms}ms")]
    CallTimeout {
        method: String,
        id: String,
        elapsed_ms: u64,
    },

    /// The child exited or its streams closed. Fatal to the session.
    #[error("transport closed{}", format_stderr_tail(.stderr_tail))]
    TransportClosed { stderr_tail: Vec<String> },

    /// Caller-supplied arguments violate the tool's parameter schema.
    /// An empty field list means the tool name itself is unknown.
    #[error("{}", format_validation(.tool, .fields))]
    Validation { tool: String, fields: Vec<String> },

    /// The child reported an application-level error, passed through verbatim.
    #[error("tool '{tool}' failed: {message}{}", format_code(.code))]
    Remote {
        tool: String,
        message: String,
        code: Option<ErrorCode>,
    },

    /// The discovery response was malformed. Fatal to start().
    #[error("malformed tool catalog: {reason}")]
    Catalog { reason: String },

    /// Invariant violation inside the dispatcher. Indicates a bug.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl RpcError {
    /// True when the session is unusable and must be restarted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RpcError::Launch { .. } | RpcError::TransportClosed { .. } | RpcError::Catalog { .. }
        )
    }
}

fn format_stderr_tail(tail: &[String]) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("; child stderr tail:\n{}", tail.join("\n"))
    }
}

fn format_validation(tool: &str, fields: &[String]) -> String {
    if fields.is_empty() {
        format!("unknown tool '{}'", tool)
    } else {
        format!("invalid arguments for '{}': {}", tool, fields.join(", "))
    }
}

fn format_code(code: &Option<ErrorCode>) -> String {
    match code {
        Some(code) => format!(" (code {})", code),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display_lists_fields() {
        let err = RpcError::Validation {
            tool: "read_query".to_string(),
            fields: vec!["query".to_string(), "max_rows".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "invalid arguments for 'read_query': query, max_rows"
        );
    }

    #[test]
    fn validation_display_without_fields_means_unknown_tool() {
        let err = RpcError::Validation {
            tool: "nope".to_string(),
            fields: vec![],
        };
        assert_eq!(err.to_string(), "unknown tool 'nope'");
    }

    #[test]
    fn transport_closed_display_includes_stderr() {
        let err = RpcError::TransportClosed {
            stderr_tail: vec!["connection refused".to_string()],
        };
        assert!(err.to_string().contains("connection refused"));
        assert!(err.is_fatal());
    }

    #[test]
    fn call_timeout_is_not_fatal() {
        let err = RpcError::CallTimeout {
            method: "list_tables".to_string(),
            id: "3".to_string(),
            elapsed_ms: 500,
        };
        assert!(!err.is_fatal());
    }
}

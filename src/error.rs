//! Error taxonomy for the client.
//!
//! [`ClientError`]'s caller-visible surface is `InvalidURI`,
//! `ConnectionTimeout`, `ResponseTimeout`, `ResponseAborted`,
//! `ResponseFailed`. The remaining variants are internal sentinels used
//! between the reader task and the rest of the connection; they are
//! logged and converted rather than ever returned from the public API.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid URI: {0}")]
    InvalidURI(String),

    #[error("timed out waiting for the server connection to become ready")]
    ConnectionTimeout,

    #[error("timed out waiting for a response to request {0}")]
    ResponseTimeout(u64),

    #[error("response for request {0} was aborted (connection lost)")]
    ResponseAborted(u64),

    #[error("server returned an error for request {id}: {code} {message}")]
    ResponseFailed {
        id: u64,
        code: ProtocolErrorCode,
        message: String,
    },

    /// Frame with an `id` the response registry has no record of.
    #[error("unexpected response for unknown request id {0}")]
    UnexpectedResponse(u64),

    /// Missing/invalid `Content-Length`, malformed header, or invalid JSON body.
    #[error("protocol framing error: {0}")]
    ProtocolFramingError(String),

    /// Internal sentinel raised by the reader on clean teardown; never
    /// surfaced to callers, consumed by the connection's shutdown path.
    #[error("connection stopped")]
    ConnectionStopped,

    #[error("subprocess failed to terminate within the shutdown deadline")]
    SubprocessTerminationStuck,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// JSON-RPC / LSP error code.
///
/// A thin newtype with associated constants rather than a runtime-built
/// registry: Rust enums can't carry the `(code, reason)` pair the way the
/// source's generated error classes did, so a `const fn` reverse lookup
/// does the same job without generating anything at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolErrorCode(pub i32);

impl ProtocolErrorCode {
    pub const PARSE_ERROR: Self = Self(-32700);
    pub const INVALID_REQUEST: Self = Self(-32600);
    pub const METHOD_NOT_FOUND: Self = Self(-32601);
    pub const INVALID_PARAMS: Self = Self(-32602);
    pub const INTERNAL_ERROR: Self = Self(-32603);
    pub const SERVER_NOT_INITIALIZED: Self = Self(-32002);
    pub const UNKNOWN_ERROR_CODE: Self = Self(-32001);
    pub const REQUEST_CANCELLED: Self = Self(-32800);
    pub const CONTENT_MODIFIED: Self = Self(-32801);

    /// Human-readable reason for known codes; `"unknown error code"` for
    /// anything in the reserved server-error range or otherwise unlisted.
    pub const fn reason(self) -> &'static str {
        match self.0 {
            -32700 => "Parse error",
            -32600 => "Invalid Request",
            -32601 => "Method not found",
            -32602 => "Invalid params",
            -32603 => "Internal error",
            -32002 => "Server not initialized",
            -32001 => "Unknown error code",
            -32800 => "Request cancelled",
            -32801 => "Content modified",
            _ => "unknown error code",
        }
    }
}

impl std::fmt::Display for ProtocolErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.0, self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_reverse_lookup() {
        assert_eq!(ProtocolErrorCode::METHOD_NOT_FOUND.reason(), "Method not found");
        assert_eq!(ProtocolErrorCode(-32050).reason(), "unknown error code");
    }

    #[test]
    fn display_includes_reason() {
        let s = ProtocolErrorCode::INVALID_PARAMS.to_string();
        assert!(s.contains("-32602"));
        assert!(s.contains("Invalid params"));
    }
}

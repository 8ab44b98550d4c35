//! JSON-RPC 2.0 envelope types.
//!
//! `RequestId` is a monotonic `u64` rather than a `String`/UUID: ids are
//! allocated under a lock and never reused, which a plain integer
//! models directly without needing string formatting or parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type RequestId = u64;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: crate::error::ProtocolErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.0,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            crate::error::ProtocolErrorCode::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )
    }
}

/// A response to a request the peer sent us (server→client request), or a
/// response we received to a request we sent (client→server request).
/// The `id` echoed back on a response to a server-initiated request.
/// JSON-RPC allows a string or a number here, and `clangd`-like servers use
/// both, so this can't be narrowed to the `u64` this crate always uses for
/// its own outgoing requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: impl Into<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }
}

/// A decoded but not-yet-classified frame. Dispatch decides whether it's
/// a request, response, or notification based on which of `id`/`method`
/// are present. `id` keeps its original JSON type (string or number) so a
/// response can echo it back unchanged; this crate's own outgoing
/// requests always use a `u64` allocated by the response registry.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Has `id` and `method`: server-to-client request.
    Request { id: Value, method: String, params: Option<Value> },
    /// Has `id`, no `method`: response to one of our requests.
    Response(JsonRpcResponse),
    /// No `id`: notification.
    Notification { method: String, params: Option<Value> },
}

impl Frame {
    pub fn from_value(value: Value) -> crate::error::Result<Self> {
        let obj = value.as_object().ok_or_else(|| {
            crate::error::ClientError::ProtocolFramingError("frame is not a JSON object".into())
        })?;

        let id = obj.get("id").cloned();
        let method = obj.get("method").and_then(|v| v.as_str()).map(str::to_string);

        match (id, method) {
            (Some(id), Some(method)) => Ok(Frame::Request {
                id,
                method,
                params: obj.get("params").cloned(),
            }),
            (Some(_), None) => Ok(Frame::Response(serde_json::from_value(value)?)),
            (None, Some(method)) => Ok(Frame::Notification {
                method,
                params: obj.get("params").cloned(),
            }),
            (None, None) => Err(crate::error::ClientError::ProtocolFramingError(
                "frame has neither id nor method".into(),
            )),
        }
    }
}

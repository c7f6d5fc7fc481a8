use async_trait::async_trait;
use error_stack::Result;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcClientError {
    /// The request couldn't be sent or the connection failed.
    Request,
    Timeout,
    /// The node returned a JSON-RPC error object.
    Rpc { code: i64, message: String },
    /// The response doesn't have the expected shape.
    Deserialize,
    Configuration,
}

/// A single JSON-RPC call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcCall {
    pub method: String,
    pub params: Value,
}

/// JSON-RPC transport.
///
/// `priority` is a hint for transports that queue requests: lower values are served first.
/// Batch responses are returned in request order.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    async fn call(&self, call: RpcCall, priority: Option<u64>) -> Result<Value, RpcClientError>;

    async fn batch_call(
        &self,
        calls: Vec<RpcCall>,
        priority: Option<u64>,
    ) -> Result<Vec<Value>, RpcClientError>;
}

impl RpcCall {
    pub fn new(method: impl Into<String>, params: impl Serialize) -> Self {
        Self {
            method: method.into(),
            // Serializing plain params into a value doesn't fail.
            params: serde_json::to_value(params).unwrap_or(Value::Null),
        }
    }
}

impl RpcClientError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcClientError::Request | RpcClientError::Timeout => true,
            // Rate limited or server overloaded.
            RpcClientError::Rpc { code, .. } => *code == 429 || *code == -32005,
            RpcClientError::Deserialize | RpcClientError::Configuration => false,
        }
    }
}

impl error_stack::Context for RpcClientError {}

impl std::fmt::Display for RpcClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcClientError::Request => write!(f, "rpc client error: request failed"),
            RpcClientError::Timeout => write!(f, "rpc client error: request timed out"),
            RpcClientError::Rpc { code, message } => {
                write!(f, "rpc client error: rpc error {code}: {message}")
            }
            RpcClientError::Deserialize => {
                write!(f, "rpc client error: failed to deserialize response")
            }
            RpcClientError::Configuration => write!(f, "rpc client error: configuration"),
        }
    }
}

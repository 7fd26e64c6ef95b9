//! Error types for the MCP crate.

use serde_json::json;

use taskwire_component::ComponentError;
use taskwire_tasks::TaskError;

use crate::types::{error_codes, JsonRpcError};

/// Errors that can occur during MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Failed to parse JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport I/O error.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The requested method is not supported.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters for a method.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Routing, store or execution failure from the task layer.
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Error object returned by the remote side.
    #[error("Server returned error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// The MCP server process exited or is unavailable.
    #[error("Server unavailable: {0}")]
    ServerUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl McpError {
    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            McpError::Task(err) => task_rpc_error(err),
            McpError::Rpc(err) => err.clone(),
            McpError::JsonParse(_) => plain(error_codes::PARSE_ERROR, self),
            McpError::MethodNotFound(_) => plain(error_codes::METHOD_NOT_FOUND, self),
            McpError::InvalidParams(_) => plain(error_codes::INVALID_PARAMS, self),
            _ => plain(error_codes::INTERNAL_ERROR, self),
        }
    }

    /// The `data.kind` of a remote error, if the server supplied one.
    pub fn remote_kind(&self) -> Option<&str> {
        match self {
            McpError::Rpc(err) => err.data.as_ref()?.get("kind")?.as_str(),
            _ => None,
        }
    }
}

fn plain(code: i64, err: &McpError) -> JsonRpcError {
    JsonRpcError {
        code,
        message: err.to_string(),
        data: None,
    }
}

fn task_rpc_error(err: &TaskError) -> JsonRpcError {
    let code = match err {
        TaskError::PolicyViolation(_) => error_codes::METHOD_NOT_FOUND,
        TaskError::Internal(_) => error_codes::INTERNAL_ERROR,
        TaskError::Component(ComponentError::InvalidInput(_)) => error_codes::INVALID_PARAMS,
        TaskError::Component(_) => error_codes::INTERNAL_ERROR,
        _ => error_codes::INVALID_PARAMS,
    };

    let mut data = json!({ "kind": err.kind() });
    if let Some(task_id) = err.task_id() {
        data["taskId"] = json!(task_id);
    }

    JsonRpcError {
        code,
        message: err.to_string(),
        data: Some(data),
    }
}

use serde_json::Value;

/// A tool invocation addressed to one capability server.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub server: String,
    pub tool: String,
    pub args: Value,
}

impl ToolCall {
    #[must_use]
    pub fn new(server: impl Into<String>, tool: impl Into<String>, args: Value) -> Self {
        Self {
            server: server.into(),
            tool: tool.into(),
            args,
        }
    }
}

/// Errors reported by the execution backend.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("tool '{tool}' not found on server '{server}'")]
    NotFound { server: String, tool: String },

    #[error("invalid tool parameters: {message}")]
    InvalidParams { message: String },

    #[error("execution failed: {message}")]
    Execution { message: String },

    #[error("execution failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Backend that actually runs tools (RPC client, local process, ...).
///
/// The security layer treats it as opaque beyond success, failure, and
/// duration.
pub trait ToolExecutor: Send + Sync {
    fn execute(&self, call: &ToolCall) -> impl Future<Output = Result<Value, ToolError>> + Send;
}

//! Tool dispatch error type (spec §7, `StateError`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),
}

impl From<ToolError> for voice_agent_core::Error {
    fn from(err: ToolError) -> Self {
        voice_agent_core::Error::Other(err.to_string())
    }
}

//! Turn-router and DTMF-lifecycle error type (spec §7).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TurnError {
    #[error("llm generation failed: {0}")]
    Llm(String),

    #[error(transparent)]
    Tool(#[from] voice_agent_tools::ToolError),

    #[error("memory persistence failed: {0}")]
    Memory(String),

    #[error("turn cancelled")]
    Cancelled,
}

impl From<TurnError> for voice_agent_core::Error {
    fn from(err: TurnError) -> Self {
        voice_agent_core::Error::Turn(err.to_string())
    }
}

//! Azure OpenAI chat-completions backend (spec §6 LLM streaming contract).
//!
//! The only backend the gateway ships is Azure OpenAI, reached over its
//! `chat/completions` REST surface with `stream=true`; everything else
//! (retry policy, the provider-agnostic `StreamChunk` contract, tool-call
//! delta accumulation) lives behind `voice_agent_core::traits::LanguageModel`
//! so the turn router never touches provider-specific shapes.

pub mod azure_openai;
pub mod prompt;

pub use azure_openai::AzureOpenAiBackend;
pub use prompt::PromptBuilder;

use thiserror::Error;

/// Errors returned by an LLM backend before they are folded into
/// `voice_agent_core::Error` at the trait boundary.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("generation error: {0}")]
    Generation(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request timed out")]
    Timeout,

    #[error("context too long: {0} > {1} tokens")]
    ContextTooLong(usize, usize),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for voice_agent_core::Error {
    fn from(err: LlmError) -> Self {
        voice_agent_core::Error::Llm(err.to_string())
    }
}

//! Top-level error type shared across the workspace.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can cross a crate boundary into generic code.
///
/// Each downstream crate defines its own richer error enum and converts
/// into one of these variants at the boundary, so callers that only hold
/// a `voice_agent_core::Error` still get a meaningful category.
#[derive(Error, Debug)]
pub enum Error {
    #[error("audio error: {0}")]
    Audio(String),

    #[error("speech engine error: {0}")]
    Speech(String),

    #[error("llm error: {0}")]
    Llm(String),

    #[error("kv store error: {0}")]
    Kv(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("turn error: {0}")]
    Turn(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("capacity unavailable: {0}")]
    Capacity(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn displays_category_and_message() {
        let err = Error::Capacity("stt pool exhausted".to_string());
        assert_eq!(err.to_string(), "capacity unavailable: stt pool exhausted");
    }
}

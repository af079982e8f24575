//! Engine-pool and adapter error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// The only expected failure mode of `acquire_for_session`: no slot
    /// became available within the caller's timeout.
    #[error("engine pool capacity exhausted: {snapshot}")]
    Capacity { snapshot: String },

    /// Construction retries exhausted; the pool fails fast until a
    /// background task successfully constructs a replacement.
    #[error("engine pool degraded: {0}")]
    Degraded(String),

    #[error("engine construction failed: {0}")]
    Construction(String),

    #[error("speech engine error: {0}")]
    Speech(String),
}

impl From<EngineError> for voice_agent_core::Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Capacity { .. } => voice_agent_core::Error::Capacity(err.to_string()),
            EngineError::Degraded(_) | EngineError::Construction(_) | EngineError::Speech(_) => {
                voice_agent_core::Error::Speech(err.to_string())
            }
        }
    }
}

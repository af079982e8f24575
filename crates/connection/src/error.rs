//! Connection/session registry errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection not found: {0}")]
    NotFound(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("broadcast without a session id is rejected")]
    MissingSessionScope,
}

impl From<ConnectionError> for voice_agent_core::Error {
    fn from(err: ConnectionError) -> Self {
        voice_agent_core::Error::Connection(err.to_string())
    }
}

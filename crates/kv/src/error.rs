//! KV-store error type.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, KvError>;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("kv connection error: {0}")]
    Connection(String),

    #[error("kv authentication error: {0}")]
    Auth(String),

    #[error("kv serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("kv operation timed out")]
    Timeout,

    #[error("kv error: {0}")]
    Other(String),
}

impl From<KvError> for voice_agent_core::Error {
    fn from(err: KvError) -> Self {
        voice_agent_core::Error::Kv(err.to_string())
    }
}

impl From<redis::RedisError> for KvError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() {
            KvError::Connection(err.to_string())
        } else {
            KvError::Other(err.to_string())
        }
    }
}

//! Transport-layer error type (spec §7: `TransportError`/`ProviderError`
//! as they surface at the WebSocket boundary).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("engine pool error: {0}")]
    Engine(#[from] voice_agent_engines::EngineError),

    #[error("turn error: {0}")]
    Turn(#[from] voice_agent_turn::TurnError),

    #[error("connection registry error: {0}")]
    Connection(#[from] voice_agent_connection::ConnectionError),

    #[error("kv store error: {0}")]
    Kv(#[from] voice_agent_kv::KvError),

    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("websocket send failed: {0}")]
    SocketSend(String),

    #[error("malformed client frame: {0}")]
    Protocol(String),

    /// Engine-slot acquisition timed out; the caller closes the socket
    /// with code 1013 per spec §7.
    #[error("engine slot acquisition timed out")]
    CapacityTimeout,
}

impl From<TransportError> for voice_agent_core::Error {
    fn from(err: TransportError) -> Self {
        voice_agent_core::Error::Transport(err.to_string())
    }
}

//! Connection registry, session registry, and the SDK-callback-thread
//! bridge (spec §4.2, §4.3).

pub mod bridge;
pub mod error;
pub mod manager;
pub mod session;

pub use bridge::{SpeechEventQueue, ThreadBridge};
pub use error::ConnectionError;
pub use manager::{ConnectionKind, ConnectionManager, ConnectionStats};
pub use session::{SessionEntry, SessionManager};

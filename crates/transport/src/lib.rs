//! Session lifecycle, TTS egress, and barge-in protocol for both WebSocket
//! framings (spec §4.7, §4.8): the browser conversation channel and the
//! telephony media channel.

pub mod barge_in;
pub mod browser;
pub mod context;
pub mod egress;
pub mod envelope;
pub mod error;
pub mod media;
pub mod sink;
pub mod state;

pub use context::{SessionContext, TaskSet};
pub use egress::{BrowserEgress, EgressSink, TelephonyEgress};
pub use error::{Result, TransportError};
pub use sink::TurnUiSink;
pub use state::GatewayState;

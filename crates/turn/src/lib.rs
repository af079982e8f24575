//! Memory, turn router, sentence buffering, and the DTMF validation
//! lifecycle (spec §4.6, §4.9).

pub mod dtmf;
pub mod error;
pub mod memory;
pub mod router;

pub use dtmf::DtmfLifecycle;
pub use error::{Result, TurnError};
pub use memory::{LatencyTool, Memory};
pub use router::{ToolStatus, TurnRouter, TurnSink};

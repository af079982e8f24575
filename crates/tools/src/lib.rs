//! Named-function tool registry and mock domain tools (spec §1, §4.6).
//!
//! The domain tool *implementations* (appointment/refill/escalation) are
//! explicitly out of scope per spec §1 — "mock records" is the contract.
//! What the core owns is the registry shape the Turn Router dispatches
//! through: a name -> schema -> async executor lookup.

pub mod error;
pub mod mock_tools;
pub mod registry;

pub use error::ToolError;
pub use registry::{Tool, ToolRegistry};

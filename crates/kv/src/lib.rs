//! Key/value and stream client for session persistence and call-lifecycle
//! events (spec §6): a provider-agnostic [`KvStore`] trait plus an
//! in-memory fake for tests/dev and a Redis-backed implementation for
//! production.

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use error::{KvError, Result};
pub use memory::InMemoryKvStore;
pub use redis_store::{CredentialSource, RedisKvStore};
pub use store::{KvStore, StreamEvent};

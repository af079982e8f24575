//! Bounded, tiered engine pool and the Azure Speech STT/TTS adapters that
//! fill it (spec §4.1, §4.4, §4.5).

pub mod error;
pub mod pool;
pub mod stt;
pub mod tts;

pub use error::{EngineError, Result};
pub use pool::{EngineFactory, EngineHandle, EnginePool, PoolLimits, PoolSnapshot, Tier};
pub use stt::{AzureSpeechRecognizer, AzureSttFactory};
pub use tts::{AzureSpeechSynthesizer, AzureTtsFactory};

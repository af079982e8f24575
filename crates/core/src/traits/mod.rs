//! Core traits for the voice agent system
//!
//! All major components implement these traits to enable:
//! - Pluggable backends (swap implementations without code changes)
//! - Testing with hand-written fakes
//! - Runtime switching based on configuration
//!
//! # Trait Hierarchy
//!
//! ```text
//! Speech:
//!   - Recognizer / RecognizerWithPushStream: audio -> SpeechEvent
//!   - Synthesizer: text -> AudioFrame
//!
//! Language Models:
//!   - LanguageModel: text generation, streaming, and tool calling
//! ```

mod llm;
mod speech;

pub use llm::LanguageModel;
pub use speech::{Recognizer, RecognizerWithPushStream, SpeechEventCallback, Synthesizer};

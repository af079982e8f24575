//! Core types and traits for the voice agent gateway.
//!
//! This crate provides foundational types used across all other crates:
//! - Capability traits for pluggable STT/TTS/LLM backends
//! - Audio frame types
//! - Transcript/speech-event types
//! - LLM request/response/streaming types
//! - The crate-wide error type

pub mod audio;
pub mod error;
pub mod llm_types;
pub mod metrics;
pub mod traits;
pub mod transcript;
pub mod voice_config;

pub use audio::{AudioEncoding, AudioFrame, Channels, SampleRate, FRAME_DURATION_MS};
pub use error::{Error, Result};
pub use llm_types::{
    Delta, FinishReason, GenerateRequest, GenerateResponse, Message, Role, StreamChunk,
    TokenUsage, ToolCall, ToolCallDelta, ToolDefinition,
};
pub use transcript::{SpeechEvent, SpeechEventKind, TranscriptResult, WordTimestamp};
pub use voice_config::{VoiceConfig, VoiceGender, VoiceInfo};

pub use traits::{
    LanguageModel, Recognizer, RecognizerWithPushStream, SpeechEventCallback, Synthesizer,
};

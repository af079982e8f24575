//! Recognition result types produced by STT adapters.

use serde::{Deserialize, Serialize};

/// A word-level timestamp within a recognition result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
    #[serde(default)]
    pub confidence: f32,
}

/// A single STT recognition result, partial or final.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TranscriptResult {
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default)]
    pub words: Vec<WordTimestamp>,
    #[serde(default)]
    pub language: Option<String>,
}

/// Kind of speech event emitted by a recognizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechEventKind {
    Partial,
    Final,
    Cancel,
}

/// Event emitted by the Speech Thread on the callback thread, destined for
/// the Thread Bridge (spec §3, `SpeechEvent`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechEvent {
    pub kind: SpeechEventKind,
    pub text: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub speaker_id: Option<String>,
    pub ts_ms: u64,
}

impl SpeechEvent {
    pub fn partial(text: impl Into<String>, ts_ms: u64) -> Self {
        Self {
            kind: SpeechEventKind::Partial,
            text: text.into(),
            language: None,
            speaker_id: None,
            ts_ms,
        }
    }

    pub fn final_(text: impl Into<String>, ts_ms: u64) -> Self {
        Self {
            kind: SpeechEventKind::Final,
            text: text.into(),
            language: None,
            speaker_id: None,
            ts_ms,
        }
    }

    pub fn cancel(ts_ms: u64) -> Self {
        Self {
            kind: SpeechEventKind::Cancel,
            text: String::new(),
            language: None,
            speaker_id: None,
            ts_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind() {
        assert_eq!(SpeechEvent::partial("hi", 0).kind, SpeechEventKind::Partial);
        assert_eq!(SpeechEvent::final_("hi", 0).kind, SpeechEventKind::Final);
        assert_eq!(SpeechEvent::cancel(0).kind, SpeechEventKind::Cancel);
    }
}

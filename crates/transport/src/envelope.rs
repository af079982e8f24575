//! JSON envelope constructors for the browser client protocol and the
//! telephony media channel (spec §6, normative verbatim). Kept as plain
//! functions returning `serde_json::Value` rather than tagged enums so
//! each shape matches the wire contract exactly, including fields that
//! only some variants carry.

use base64::Engine as _;
use serde_json::{json, Value};

pub fn status(content: &str, sender: &str, session_id: &str) -> Value {
    json!({
        "type": "status",
        "content": content,
        "sender": sender,
        "topic": "session",
        "session_id": session_id,
    })
}

pub fn event(sender: &str, message: &str, topic: &str, session_id: &str) -> Value {
    json!({
        "type": "event",
        "payload": { "sender": sender, "message": message },
        "sender": sender,
        "topic": topic,
        "session_id": session_id,
    })
}

pub fn assistant_streaming(content: &str) -> Value {
    json!({ "type": "assistant_streaming", "content": content })
}

pub fn assistant_final(content: &str, speaker: &str) -> Value {
    json!({ "type": "assistant_final", "content": content, "speaker": speaker })
}

/// Browser TTS frame (spec §4.5 step 4, browser framing).
pub fn audio_data(pcm: &[u8], frame_index: usize, total_frames: usize, sample_rate: u32, is_final: bool) -> Value {
    json!({
        "type": "audio_data",
        "data": base64::engine::general_purpose::STANDARD.encode(pcm),
        "frame_index": frame_index,
        "total_frames": total_frames,
        "sample_rate": sample_rate,
        "is_final": is_final,
    })
}

/// Barge-in signal (spec §4.7 step 4).
pub fn control_tts_cancelled(session_id: &str) -> Value {
    json!({
        "type": "control",
        "action": "tts_cancelled",
        "reason": "barge_in",
        "at": "partial",
        "session_id": session_id,
    })
}

pub fn exit(message: &str) -> Value {
    json!({ "type": "exit", "message": message })
}

pub fn tts_error(error: &str, text: &str) -> Value {
    json!({ "type": "tts_error", "error": error, "text": text })
}

/// Telephony outbound audio frame (spec §6).
pub fn telephony_audio_data(pcm: &[u8], sequence_id: u64) -> Value {
    json!({
        "kind": "AudioData",
        "AudioData": {
            "data": base64::engine::general_purpose::STANDARD.encode(pcm),
            "sequenceId": sequence_id,
        },
    })
}

pub fn telephony_stop_audio() -> Value {
    json!({ "kind": "StopAudio", "StopAudio": {} })
}

/// Parsed shape of an inbound telephony media frame, enough to dispatch
/// on `kind` without committing to a single tagged enum (the two kinds
/// carry unrelated payloads).
pub enum InboundMediaFrame {
    /// `validation_pending` mirrors a call-attribute the telephony
    /// provider can set at connect time (e.g. `aws_connect_validation_pending`)
    /// to request the DTMF validation gate for this call; most calls don't
    /// set it, so the gate defaults to open (spec §4.9).
    AudioMetadata { sample_rate: u32, validation_pending: bool },
    AudioData { pcm: Vec<u8> },
    /// `DTMF_TONE_RECEIVED` (spec §4.9), carried over the same media
    /// channel as a `DtmfData` frame.
    DtmfTone { tone: String, sequence_id: u64 },
    Unknown,
}

pub fn parse_inbound_media_frame(raw: &Value) -> InboundMediaFrame {
    match raw.get("kind").and_then(Value::as_str) {
        Some("AudioMetadata") => {
            let metadata = raw.get("audioMetadata");
            let sample_rate = metadata
                .and_then(|m| m.get("sampleRate"))
                .and_then(Value::as_u64)
                .unwrap_or(16_000) as u32;
            let validation_pending = metadata
                .and_then(|m| m.get("validationPending"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            InboundMediaFrame::AudioMetadata { sample_rate, validation_pending }
        }
        Some("AudioData") => {
            let data = raw
                .get("audioData")
                .and_then(|d| d.get("data"))
                .and_then(Value::as_str)
                .unwrap_or("");
            let pcm = base64::engine::general_purpose::STANDARD.decode(data).unwrap_or_default();
            InboundMediaFrame::AudioData { pcm }
        }
        Some("DtmfData") => {
            let tone = raw
                .get("dtmfData")
                .and_then(|d| d.get("tone"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let sequence_id = raw
                .get("dtmfData")
                .and_then(|d| d.get("sequenceId"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            InboundMediaFrame::DtmfTone { tone, sequence_id }
        }
        _ => InboundMediaFrame::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_data_envelope_base64_encodes_pcm() {
        let env = audio_data(&[1, 2, 3], 0, 2, 16_000, false);
        assert_eq!(env["type"], "audio_data");
        assert_eq!(env["data"], base64::engine::general_purpose::STANDARD.encode([1, 2, 3]));
        assert_eq!(env["is_final"], false);
    }

    #[test]
    fn telephony_audio_data_uses_sequence_id_not_frame_index() {
        let env = telephony_audio_data(&[9, 9], 42);
        assert_eq!(env["kind"], "AudioData");
        assert_eq!(env["AudioData"]["sequenceId"], 42);
    }

    #[test]
    fn control_envelope_matches_barge_in_shape() {
        let env = control_tts_cancelled("sess-1");
        assert_eq!(env["action"], "tts_cancelled");
        assert_eq!(env["reason"], "barge_in");
        assert_eq!(env["at"], "partial");
    }

    #[test]
    fn parse_inbound_audio_metadata_reads_sample_rate() {
        let raw = json!({"kind": "AudioMetadata", "audioMetadata": {"encoding": "PCM", "sampleRate": 16000, "channels": 1}});
        match parse_inbound_media_frame(&raw) {
            InboundMediaFrame::AudioMetadata { sample_rate, validation_pending } => {
                assert_eq!(sample_rate, 16_000);
                assert!(!validation_pending);
            }
            _ => panic!("expected AudioMetadata"),
        }
    }

    #[test]
    fn parse_inbound_audio_metadata_reads_validation_pending_flag() {
        let raw = json!({"kind": "AudioMetadata", "audioMetadata": {"sampleRate": 16000, "validationPending": true}});
        match parse_inbound_media_frame(&raw) {
            InboundMediaFrame::AudioMetadata { validation_pending, .. } => assert!(validation_pending),
            _ => panic!("expected AudioMetadata"),
        }
    }

    #[test]
    fn parse_inbound_audio_data_decodes_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([1, 2, 3, 4]);
        let raw = json!({"kind": "AudioData", "audioData": {"data": encoded, "silent": false, "timestamp": 0}});
        match parse_inbound_media_frame(&raw) {
            InboundMediaFrame::AudioData { pcm } => assert_eq!(pcm, vec![1, 2, 3, 4]),
            _ => panic!("expected AudioData"),
        }
    }

    #[test]
    fn unknown_kind_is_ignored_not_an_error() {
        let raw = json!({"kind": "SomethingElse"});
        assert!(matches!(parse_inbound_media_frame(&raw), InboundMediaFrame::Unknown));
    }
}

//! Speech engine capability traits.
//!
//! Replaces the reflective "does this object have attribute X" lookups the
//! source system used to probe adapter capabilities (spec §9) with explicit
//! traits: a recognizer that accepts a push stream of audio and a
//! synthesizer that turns text into PCM. An adapter implements whichever
//! capabilities its underlying SDK actually supports.

use crate::audio::AudioFrame;
use crate::transcript::SpeechEvent;
use crate::voice_config::{VoiceConfig, VoiceInfo};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Callback invoked from the recognizer's own (possibly non-cooperative)
/// thread for every partial/final/cancel event it produces.
pub type SpeechEventCallback = Arc<dyn Fn(SpeechEvent) + Send + Sync>;

/// Common identity surface of a recognizer, independent of how audio is
/// delivered to it.
pub trait Recognizer: Send + Sync + 'static {
    /// Model name for logging/diagnostics.
    fn model_name(&self) -> &str;

    /// Languages this recognizer can transcribe.
    fn supported_languages(&self) -> &[String];

    fn supports_language(&self, lang: &str) -> bool {
        self.supported_languages().iter().any(|l| l == lang)
    }
}

/// A recognizer that accepts audio via a push stream and emits events on
/// its own callback thread (spec §4.4, Speech Thread).
///
/// # Example
///
/// ```ignore
/// recognizer.start(Arc::new(move |event| bridge.queue_speech_result(&queue, event)))?;
/// recognizer.push_audio(&pcm_chunk)?;
/// recognizer.stop()?;
/// ```
pub trait RecognizerWithPushStream: Recognizer {
    /// Wire the event callback and open the underlying push stream.
    /// Calling `push_audio` before `start` is a logged no-op, not an error.
    fn start(&self, on_event: SpeechEventCallback) -> Result<()>;

    /// Push one chunk of PCM16 audio into the recognizer.
    fn push_audio(&self, chunk: &[u8]) -> Result<()>;

    /// Stop the recognizer and release its underlying resources.
    fn stop(&self) -> Result<()>;
}

/// Text-to-speech synthesis capability (spec §4.5).
///
/// # Example
///
/// ```ignore
/// let voice = VoiceConfig::new("en-US-JennyNeural");
/// synthesizer.warm_up(&voice).await?;
/// let audio = synthesizer.synthesize("Hello there", &voice).await?;
/// ```
#[async_trait]
pub trait Synthesizer: Send + Sync + 'static {
    /// Synthesize `text` with the given voice into one PCM audio frame.
    /// Implementations run any blocking SDK call via `spawn_blocking`.
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> Result<AudioFrame>;

    /// One-character warm-up clip; callers bound this with a 4 s timeout
    /// and treat failure as best-effort (spec §9, Open Question resolved
    /// in DESIGN.md).
    async fn warm_up(&self, voice: &VoiceConfig) -> Result<()>;

    /// Best-effort, non-blocking request to stop in-flight synthesis.
    fn stop_speaking(&self);

    /// Model name for logging/diagnostics.
    fn model_name(&self) -> &str;

    fn available_voices(&self) -> &[VoiceInfo];

    fn default_voice(&self) -> Option<&VoiceInfo> {
        self.available_voices().first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Channels, SampleRate};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct MockSynth {
        voices: Vec<VoiceInfo>,
        stop_requested: AtomicBool,
    }

    #[async_trait]
    impl Synthesizer for MockSynth {
        async fn synthesize(&self, text: &str, _voice: &VoiceConfig) -> Result<AudioFrame> {
            Ok(AudioFrame::new(
                vec![0u8; text.len() * 2],
                SampleRate::Hz16000,
                Channels::Mono,
                0,
            ))
        }

        async fn warm_up(&self, _voice: &VoiceConfig) -> Result<()> {
            Ok(())
        }

        fn stop_speaking(&self) {
            self.stop_requested.store(true, Ordering::SeqCst);
        }

        fn model_name(&self) -> &str {
            "mock-tts"
        }

        fn available_voices(&self) -> &[VoiceInfo] {
            &self.voices
        }
    }

    #[tokio::test]
    async fn synthesize_produces_pcm_proportional_to_text() {
        let synth = MockSynth {
            voices: vec![],
            stop_requested: AtomicBool::new(false),
        };
        let frame = synth
            .synthesize("hello", &VoiceConfig::default())
            .await
            .unwrap();
        assert_eq!(frame.samples.len(), 10);
    }

    #[test]
    fn stop_speaking_is_best_effort_and_synchronous() {
        let synth = MockSynth {
            voices: vec![],
            stop_requested: AtomicBool::new(false),
        };
        synth.stop_speaking();
        assert!(synth.stop_requested.load(Ordering::SeqCst));
    }

    struct MockRecognizer {
        callback: Mutex<Option<SpeechEventCallback>>,
        languages: Vec<String>,
    }

    impl Recognizer for MockRecognizer {
        fn model_name(&self) -> &str {
            "mock-stt"
        }

        fn supported_languages(&self) -> &[String] {
            &self.languages
        }
    }

    impl RecognizerWithPushStream for MockRecognizer {
        fn start(&self, on_event: SpeechEventCallback) -> Result<()> {
            *self.callback.lock() = Some(on_event);
            Ok(())
        }

        fn push_audio(&self, chunk: &[u8]) -> Result<()> {
            if let Some(cb) = self.callback.lock().as_ref() {
                cb(SpeechEvent::partial(format!("{} bytes", chunk.len()), 0));
            }
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            *self.callback.lock() = None;
            Ok(())
        }
    }

    #[test]
    fn supports_language_checks_catalog() {
        let r = MockRecognizer {
            callback: Mutex::new(None),
            languages: vec!["en-US".to_string(), "hi-IN".to_string()],
        };
        assert!(r.supports_language("en-US"));
        assert!(!r.supports_language("ta-IN"));
    }

    #[test]
    fn push_before_start_is_a_noop_not_an_error() {
        let r = MockRecognizer {
            callback: Mutex::new(None),
            languages: vec![],
        };
        assert!(r.push_audio(&[1, 2, 3]).is_ok());
    }
}

//! Azure Speech recognizer adapter implementing
//! `voice_agent_core::traits::{Recognizer, RecognizerWithPushStream}`.
//!
//! Models the "Speech Thread" of spec §4.4: a dedicated `std::thread`
//! drives recognition and invokes the event callback from outside the
//! tokio runtime, exactly the non-cooperative-thread shape the Thread
//! Bridge (`voice_agent_connection::ThreadBridge`) exists to cross. The
//! thread carries its own small current-thread tokio runtime so it can
//! still issue the (async-native) `reqwest` calls to Azure's REST STT
//! endpoint.

use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use tracing::{debug, warn};

use voice_agent_core::traits::speech::{Recognizer, RecognizerWithPushStream, SpeechEventCallback};
use voice_agent_core::transcript::SpeechEvent;
use voice_agent_core::Result as CoreResult;

use voice_agent_config::AzureSpeechConfig;

use crate::error::{EngineError, Result};
use crate::pool::EngineFactory;

enum Command {
    Audio(Vec<u8>),
    Stop,
}

struct WorkerHandle {
    tx: std_mpsc::Sender<Command>,
    join: JoinHandle<()>,
}

pub struct AzureSpeechRecognizer {
    config: AzureSpeechConfig,
    languages: Vec<String>,
    client: Client,
    worker: Mutex<Option<WorkerHandle>>,
}

impl AzureSpeechRecognizer {
    pub fn new(config: AzureSpeechConfig, languages: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EngineError::Speech(e.to_string()))?;
        Ok(Self { config, languages, client, worker: Mutex::new(None) })
    }

    fn endpoint(&self) -> Result<String> {
        let region = self
            .config
            .region
            .as_deref()
            .ok_or_else(|| EngineError::Speech("azure speech region not configured".into()))?;
        let language = self.languages.first().cloned().unwrap_or_else(|| "en-US".to_string());
        Ok(format!(
            "https://{region}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1?language={language}"
        ))
    }

    async fn recognize(client: &Client, endpoint: &str, key: &str, pcm: &[u8]) -> Result<String> {
        let response = client
            .post(endpoint)
            .header("Ocp-Apim-Subscription-Key", key)
            .header("Content-Type", "audio/wav; codecs=audio/pcm; samplerate=16000")
            .body(pcm.to_vec())
            .send()
            .await
            .map_err(|e| EngineError::Speech(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::Speech(format!("azure stt returned {}", response.status())));
        }

        #[derive(serde::Deserialize)]
        struct RecognitionResponse {
            #[serde(rename = "DisplayText", default)]
            display_text: String,
        }

        let body: RecognitionResponse =
            response.json().await.map_err(|e| EngineError::Speech(e.to_string()))?;
        Ok(body.display_text)
    }
}

impl Recognizer for AzureSpeechRecognizer {
    fn model_name(&self) -> &str {
        "azure-speech-stt"
    }

    fn supported_languages(&self) -> &[String] {
        &self.languages
    }
}

impl RecognizerWithPushStream for AzureSpeechRecognizer {
    fn start(&self, on_event: SpeechEventCallback) -> CoreResult<()> {
        let (tx, rx) = std_mpsc::channel::<Command>();
        let client = self.client.clone();
        let endpoint = self.endpoint().map_err(voice_agent_core::Error::from)?;
        let key = self
            .config
            .key
            .clone()
            .ok_or_else(|| voice_agent_core::Error::from(EngineError::Speech("azure speech key not configured".into())))?;

        let join = std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(err) => {
                    warn!(%err, "failed to start speech thread runtime");
                    return;
                }
            };

            let mut buffer: Vec<u8> = Vec::new();
            let mut ts_ms: u64 = 0;
            loop {
                match rx.recv() {
                    Ok(Command::Audio(chunk)) => {
                        ts_ms += 20;
                        buffer.extend_from_slice(&chunk);
                        on_event(SpeechEvent::partial(format!("[{} bytes buffered]", buffer.len()), ts_ms));
                    }
                    Ok(Command::Stop) | Err(_) => {
                        if !buffer.is_empty() {
                            let started = std::time::Instant::now();
                            let text = rt
                                .block_on(Self::recognize(&client, &endpoint, &key, &buffer))
                                .unwrap_or_else(|err| {
                                    warn!(%err, "azure stt recognition failed");
                                    String::new()
                                });
                            voice_agent_core::metrics::record_stt_latency(
                                started.elapsed().as_secs_f64() * 1000.0,
                            );
                            on_event(SpeechEvent::final_(text, ts_ms));
                        } else {
                            on_event(SpeechEvent::cancel(ts_ms));
                        }
                        return;
                    }
                }
            }
        });

        *self.worker.lock() = Some(WorkerHandle { tx, join });
        Ok(())
    }

    fn push_audio(&self, chunk: &[u8]) -> CoreResult<()> {
        let guard = self.worker.lock();
        if let Some(worker) = guard.as_ref() {
            let _ = worker.tx.send(Command::Audio(chunk.to_vec()));
        }
        // push before start is a logged no-op, not an error (spec §4.4)
        Ok(())
    }

    fn stop(&self) -> CoreResult<()> {
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.tx.send(Command::Stop);
            if let Err(err) = worker.join.join() {
                warn!(?err, "speech thread panicked during shutdown");
            }
        }
        Ok(())
    }
}

/// Constructs [`AzureSpeechRecognizer`] instances for the STT engine pool.
pub struct AzureSttFactory {
    config: AzureSpeechConfig,
    languages: Vec<String>,
}

impl AzureSttFactory {
    pub fn new(config: AzureSpeechConfig, languages: Vec<String>) -> Self {
        Self { config, languages }
    }
}

#[async_trait]
impl EngineFactory<AzureSpeechRecognizer> for AzureSttFactory {
    async fn construct(&self) -> Result<AzureSpeechRecognizer> {
        AzureSpeechRecognizer::new(self.config.clone(), self.languages.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;

    #[test]
    fn push_audio_before_start_is_a_noop_not_an_error() {
        let recognizer = AzureSpeechRecognizer::new(AzureSpeechConfig::default(), vec!["en-US".into()]).unwrap();
        assert!(recognizer.push_audio(&[1, 2, 3]).is_ok());
    }

    #[test]
    fn supports_language_checks_catalog() {
        let recognizer =
            AzureSpeechRecognizer::new(AzureSpeechConfig::default(), vec!["en-US".into(), "hi-IN".into()]).unwrap();
        assert!(recognizer.supports_language("hi-IN"));
        assert!(!recognizer.supports_language("ta-IN"));
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let recognizer = AzureSpeechRecognizer::new(AzureSpeechConfig::default(), vec![]).unwrap();
        assert!(recognizer.stop().is_ok());
    }

    #[test]
    fn start_without_key_fails_fast() {
        let recognizer =
            AzureSpeechRecognizer::new(AzureSpeechConfig { region: Some("eastus".into()), ..Default::default() }, vec![])
                .unwrap();
        let events = Arc::new(PMutex::new(Vec::new()));
        let events2 = events.clone();
        let result = recognizer.start(Arc::new(move |e| events2.lock().push(e)));
        assert!(result.is_err());
    }
}

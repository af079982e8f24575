//! Voice selection for TTS synthesis.

use serde::{Deserialize, Serialize};

/// The `(voice, style, rate)` tuple a TTS engine slot's warm-up is keyed on
/// (spec §3, `EngineSlot.prepared_voices`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub voice: String,
    #[serde(default)]
    pub style: Option<String>,
    /// Speech rate, e.g. "1.0" or a provider-specific token like "+10%".
    #[serde(default = "default_rate")]
    pub rate: String,
}

fn default_rate() -> String {
    "1.0".to_string()
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: "default".to_string(),
            style: None,
            rate: default_rate(),
        }
    }
}

impl VoiceConfig {
    pub fn new(voice: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            ..Default::default()
        }
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = Some(style.into());
        self
    }

    pub fn with_rate(mut self, rate: impl Into<String>) -> Self {
        self.rate = rate.into();
        self
    }
}

/// Gender of a voice, for catalog display purposes only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceGender {
    Male,
    Female,
    Neutral,
}

/// A voice available from a TTS engine's catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    pub language: String,
    #[serde(default)]
    pub gender: Option<VoiceGender>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_config_identity_used_as_warmup_key() {
        let a = VoiceConfig::new("en-US-JennyNeural").with_style("cheerful");
        let b = VoiceConfig::new("en-US-JennyNeural").with_style("cheerful");
        assert_eq!(a, b);
        let c = a.clone().with_rate("1.2");
        assert_ne!(a, c);
    }
}

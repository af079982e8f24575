//! Audio frame types.
//!
//! The core deals exclusively in PCM16 (signed 16-bit little-endian linear
//! PCM). Transcoding between arbitrary codecs is an explicit non-goal.

use serde::{Deserialize, Serialize};

/// Sample rates the gateway is required to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRate {
    /// Telephony inbound PCM.
    Hz16000,
    /// Recommended browser sample rate.
    Hz24000,
    /// Other explicit rate, used by browser clients that negotiate one.
    Other(u32),
}

impl SampleRate {
    pub fn as_hz(self) -> u32 {
        match self {
            SampleRate::Hz16000 => 16_000,
            SampleRate::Hz24000 => 24_000,
            SampleRate::Other(hz) => hz,
        }
    }
}

/// Channel layout. The gateway only ever deals in mono audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Channels {
    Mono,
}

impl Channels {
    pub fn count(self) -> u16 {
        match self {
            Channels::Mono => 1,
        }
    }
}

/// Audio encoding. PCM16 is the only encoding the core supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioEncoding {
    Pcm16,
}

/// A block of raw PCM16 audio with enough metadata to frame and pace it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Raw little-endian PCM16 samples.
    pub samples: Vec<u8>,
    pub sample_rate: SampleRate,
    pub channels: Channels,
    pub encoding: AudioEncoding,
    /// Milliseconds since the session's epoch, for ordering/diagnostics.
    pub timestamp_ms: u64,
}

/// Frame duration mandated by spec: 20 ms per egress frame.
pub const FRAME_DURATION_MS: u32 = 20;

impl AudioFrame {
    pub fn new(samples: Vec<u8>, sample_rate: SampleRate, channels: Channels, timestamp_ms: u64) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            encoding: AudioEncoding::Pcm16,
            timestamp_ms,
        }
    }

    /// Number of bytes in one 20 ms frame at this sample rate (16-bit mono).
    pub fn frame_byte_size(sample_rate: SampleRate) -> usize {
        let samples_per_frame = (sample_rate.as_hz() as u64 * FRAME_DURATION_MS as u64) / 1000;
        (samples_per_frame * 2) as usize
    }

    /// Duration of this frame's payload in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        let bytes_per_sample = 2u64;
        let sample_count = self.samples.len() as u64 / bytes_per_sample;
        (sample_count * 1000) / self.sample_rate.as_hz() as u64
    }

    /// Split raw PCM into fixed-duration frames, padding the final short
    /// frame with zero bytes so it is never shorter than a full frame.
    ///
    /// Per spec §4.5: if the input is shorter than one frame, pad and send
    /// exactly one frame; never emit zero frames for non-empty input.
    pub fn split_into_frames(pcm: &[u8], sample_rate: SampleRate) -> Vec<Vec<u8>> {
        if pcm.is_empty() {
            return Vec::new();
        }
        let frame_size = Self::frame_byte_size(sample_rate);
        let mut frames = Vec::with_capacity(pcm.len() / frame_size + 1);
        let mut offset = 0;
        while offset < pcm.len() {
            let end = (offset + frame_size).min(pcm.len());
            let mut chunk = pcm[offset..end].to_vec();
            if chunk.len() < frame_size {
                chunk.resize(frame_size, 0);
            }
            frames.push(chunk);
            offset = end;
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_byte_size_16k_20ms() {
        // 16000 Hz * 20ms / 1000 = 320 samples * 2 bytes = 640 bytes
        assert_eq!(AudioFrame::frame_byte_size(SampleRate::Hz16000), 640);
    }

    #[test]
    fn short_pcm_is_padded_to_one_frame() {
        let pcm = vec![1, 2, 3];
        let frames = AudioFrame::split_into_frames(&pcm, SampleRate::Hz16000);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), 640);
        assert_eq!(&frames[0][..3], &[1, 2, 3]);
    }

    #[test]
    fn empty_pcm_yields_no_frames() {
        assert!(AudioFrame::split_into_frames(&[], SampleRate::Hz16000).is_empty());
    }

    #[test]
    fn exact_multiple_yields_no_padding_waste() {
        let pcm = vec![0u8; 1280]; // exactly 2 frames at 16k
        let frames = AudioFrame::split_into_frames(&pcm, SampleRate::Hz16000);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 640));
    }
}

//! Audio formats, PCM frame helpers, and the capture/playback pipelines.

mod capture;
mod playback;

pub use capture::{AudioCapture, AudioSource, AudioSourceFactory, CaptureObserver};
pub use playback::{AudioSink, AudioSinkFactory, PlaybackQueue};

use serde::{Deserialize, Serialize};

/// Duration of one captured chunk in milliseconds.
pub const CHUNK_DURATION_MS: u32 = 20;

/// Complete audio format specification (PCM16 little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g. 16000, 24000).
    pub sample_rate: u32,
    /// Number of channels (1 = mono).
    pub channels: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::pcm16_16khz()
    }
}

impl AudioFormat {
    /// PCM16 mono at 16 kHz (model input default).
    pub fn pcm16_16khz() -> Self {
        Self { sample_rate: 16000, channels: 1 }
    }

    /// PCM16 mono at 24 kHz (model output default).
    pub fn pcm16_24khz() -> Self {
        Self { sample_rate: 24000, channels: 1 }
    }

    /// Bytes per second for this format (2 bytes per sample).
    pub fn bytes_per_second(&self) -> u32 {
        self.sample_rate * self.channels as u32 * 2
    }

    /// Size in bytes of one capture chunk of [`CHUNK_DURATION_MS`]. Always
    /// a whole number of samples.
    pub fn chunk_size_bytes(&self) -> usize {
        let samples = self.sample_rate * CHUNK_DURATION_MS / 1000;
        (samples * self.channels as u32 * 2) as usize
    }

    /// Duration in milliseconds of a buffer of the given byte length.
    pub fn duration_ms(&self, bytes: usize) -> f64 {
        bytes as f64 * 1000.0 / self.bytes_per_second() as f64
    }

    /// The mime type used for realtime-input media chunks.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }
}

/// A PCM16 byte buffer with format information.
///
/// Ownership transfers from producer to queue to consumer; frames are
/// consumed exactly once, in FIFO order.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw PCM16 little-endian bytes.
    pub data: Vec<u8>,
    /// Format of this frame.
    pub format: AudioFormat,
}

impl AudioFrame {
    /// Create a new frame.
    pub fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self { data, format }
    }

    /// Encode the frame data as base64.
    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// Decode a frame from base64.
    pub fn from_base64(encoded: &str, format: AudioFormat) -> Result<Self, base64::DecodeError> {
        use base64::Engine;
        let data = base64::engine::general_purpose::STANDARD.decode(encoded)?;
        Ok(Self::new(data, format))
    }

    /// Create a frame from i16 samples (little-endian PCM16 bytes).
    pub fn from_i16_samples(samples: &[i16], format: AudioFormat) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Self::new(data, format)
    }

    /// Interpret the frame data as i16 samples. Errors if the byte length
    /// is odd.
    pub fn to_i16_samples(&self) -> Result<Vec<i16>, String> {
        if self.data.len() % 2 != 0 {
            return Err(format!(
                "invalid data length for PCM16: {} (must be even)",
                self.data.len()
            ));
        }
        Ok(self.data.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect())
    }
}

/// Normalized RMS signal level of a PCM16 little-endian buffer, in `[0, 1]`.
///
/// A trailing odd byte is ignored.
pub fn signal_level(pcm: &[u8]) -> f32 {
    let samples = pcm.len() / 2;
    if samples == 0 {
        return 0.0;
    }
    let sum_squares: f64 = pcm
        .chunks_exact(2)
        .map(|c| {
            let s = i16::from_le_bytes([c[0], c[1]]) as f64;
            s * s
        })
        .sum();
    let rms = (sum_squares / samples as f64).sqrt();
    (rms / i16::MAX as f64).min(1.0) as f32
}

//! Speech-to-text adapters and voice activity detection

pub mod vad;
pub mod whisper;

use anyhow::Result;
use async_trait::async_trait;

pub use vad::EnergyVad;
pub use whisper::WhisperStt;

/// A speech-to-text backend.
#[async_trait]
pub trait SttEngine: Send + Sync {
    /// Transcribe audio bytes (PCM s16le) to text.
    async fn transcribe(&self, audio_data: &[u8], sample_rate: u32) -> Result<String>;
}

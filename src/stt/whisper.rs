//! Whisper transcription over an OpenAI-compatible endpoint
//!
//! The buffered PCM recording is wrapped into an in-memory WAV and posted
//! to `/audio/transcriptions`; works against api.openai.com or any
//! self-hosted whisper server speaking the same shape.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use super::SttEngine;
use crate::audio::pcm_to_wav;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Speech-to-text via a Whisper transcription endpoint.
pub struct WhisperStt {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

impl WhisperStt {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            model: model.into(),
            language: language.into(),
        }
    }

    /// Override the API base URL (proxies, self-hosted whisper).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SttEngine for WhisperStt {
    async fn transcribe(&self, audio_data: &[u8], sample_rate: u32) -> Result<String> {
        if audio_data.is_empty() {
            return Ok(String::new());
        }

        let wav = pcm_to_wav(audio_data, sample_rate, 1)?;

        let file_part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .context("Invalid WAV mime type")?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone());
        if self.language != "auto" && !self.language.is_empty() {
            form = form.text("language", self.language.clone());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .context("Transcription request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Transcription API error ({}): {}", status, body);
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .context("Failed to parse transcription response")?;
        Ok(parsed.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_audio_short_circuits() {
        // No network call happens for an empty buffer
        let stt = WhisperStt::new("key", "whisper-1", "en")
            .with_base_url("http://127.0.0.1:1/unreachable");
        let text = stt.transcribe(&[], 16000).await.unwrap();
        assert_eq!(text, "");
    }

    #[test]
    fn test_transcription_response_parsing() {
        let parsed: TranscriptionResponse =
            serde_json::from_str(r#"{"text": " hello world \n"}"#).unwrap();
        assert_eq!(parsed.text.trim(), "hello world");

        let parsed: TranscriptionResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.text, "");
    }
}

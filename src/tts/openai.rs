//! OpenAI streaming TTS implementation

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;

use super::TtsEngine;
use crate::config::TtsConfig;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Text-to-speech via OpenAI's streaming speech endpoint.
pub struct OpenAiTts {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
    speed: f32,
    instructions: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
    speed: f32,
    #[serde(skip_serializing_if = "str::is_empty")]
    instructions: &'a str,
}

impl OpenAiTts {
    pub fn new(api_key: impl Into<String>, config: &TtsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: OPENAI_BASE_URL.to_string(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
            instructions: config.instructions.clone(),
        }
    }

    /// Override the API base URL (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl TtsEngine for OpenAiTts {
    async fn synthesize(&self, text: &str) -> Result<BoxStream<'static, Result<Vec<u8>>>> {
        let request = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
            response_format: "mp3",
            speed: self.speed,
            instructions: &self.instructions,
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .context("TTS request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("TTS API error ({}): {}", status, body);
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .context("TTS stream read failed")
            })
            .boxed();
        Ok(stream)
    }
}

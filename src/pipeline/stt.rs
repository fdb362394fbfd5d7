use base64::Engine;

use crate::pipeline::audio;

/// Batch speech-to-text over the Groq Whisper endpoint.
///
/// One full utterance's audio arrives per webhook, either inline base64 or
/// as a retrievable recording URL. Silence (`Ok(None)`) is distinct from
/// failure (`Err`); the orchestrator maps them to different sentinels.
pub struct SttClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl SttClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    /// Transcribe webhook audio: a URL is downloaded, anything else is
    /// treated as base64 PCM and wrapped in a WAV container.
    pub async fn transcribe(&self, audio_data: &str) -> Result<Option<String>, SttError> {
        let wav_bytes = if audio_data.starts_with("http") {
            let resp = self
                .client
                .get(audio_data)
                .send()
                .await
                .map_err(|e| SttError::Request(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(SttError::Api(format!(
                    "recording fetch: {}",
                    resp.status()
                )));
            }
            resp.bytes()
                .await
                .map_err(|e| SttError::Request(e.to_string()))?
                .to_vec()
        } else {
            let raw = base64::engine::general_purpose::STANDARD
                .decode(audio_data)
                .map_err(|e| SttError::Decode(e.to_string()))?;
            if audio::looks_like_container(&raw) {
                raw
            } else {
                audio::pcm16_to_wav(&raw).map_err(|e| SttError::Encode(e.to_string()))?
            }
        };

        self.transcribe_wav(wav_bytes).await
    }

    async fn transcribe_wav(&self, wav_bytes: Vec<u8>) -> Result<Option<String>, SttError> {
        let part = reqwest::multipart::Part::bytes(wav_bytes)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| SttError::Request(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "text")
            .text("language", "en");

        let resp = self
            .client
            .post("https://api.groq.com/openai/v1/audio/transcriptions")
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SttError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SttError::Api(format!("{status}: {body}")));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| SttError::Request(e.to_string()))?;
        let trimmed = text.trim();

        // One stray character is transcription noise, not speech
        if trimmed.len() <= 1 {
            Ok(None)
        } else {
            Ok(Some(trimmed.to_string()))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("Transcription API error: {0}")]
    Api(String),
    #[error("Bad base64 audio payload: {0}")]
    Decode(String),
    #[error("WAV encoding failed: {0}")]
    Encode(String),
}

//! OpenAI-compatible HTTP client.
//!
//! One [`HttpAiClient`] serves completion, embeddings, image generation and
//! speech against the configured provider. Status mapping:
//! - 429 → [`CourseBuilderError::RateLimited`] (retryable)
//! - any other non-success → [`CourseBuilderError::Service`]
//! - transport failures → [`CourseBuilderError::Network`]

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use coursebuilder_shared::{CourseBuilderError, ProviderConfig, Result};

use crate::{Embedder, GeneratedImage, ImageGenerator, ImageSize, SpeechSynthesizer, TextCompletion};

const USER_AGENT: &str = concat!("coursebuilder/", env!("CARGO_PKG_VERSION"));

/// Sample rate of the raw PCM requested from `/audio/speech`.
pub const SPEECH_SAMPLE_RATE: u32 = 24_000;

/// Longest body excerpt kept in error messages.
const ERROR_BODY_LIMIT: usize = 500;

/// HTTP client for an OpenAI-compatible API.
pub struct HttpAiClient {
    client: Client,
    base_url: Url,
    api_key: String,
    completion_model: String,
    embedding_model: String,
    image_model: String,
    speech_model: String,
}

impl HttpAiClient {
    pub fn new(provider: &ProviderConfig, api_key: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(provider.base_url.trim_end_matches('/')).map_err(|e| {
            CourseBuilderError::config(format!("invalid provider base_url {:?}: {e}", provider.base_url))
        })?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| CourseBuilderError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            completion_model: provider.completion_model.clone(),
            embedding_model: provider.embedding_model.clone(),
            image_model: provider.image_model.clone(),
            speech_model: provider.speech_model.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let joined = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path);
        Url::parse(&joined)
            .map_err(|e| CourseBuilderError::config(format!("invalid endpoint {joined:?}: {e}")))
    }

    /// POST a JSON body and return the successful response.
    async fn post(
        &self,
        service: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let url = self.endpoint(path)?;
        debug!(%url, service, "calling provider");

        let response = self
            .client
            .post(url.as_str())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| CourseBuilderError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let excerpt: String = text.chars().take(ERROR_BODY_LIMIT).collect();
        if status == StatusCode::TOO_MANY_REQUESTS {
            Err(CourseBuilderError::rate_limited(service, excerpt))
        } else {
            Err(CourseBuilderError::service(
                service,
                format!("HTTP {status}: {excerpt}"),
            ))
        }
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        service: &str,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let response = self.post(service, path, body).await?;
        let raw = response
            .text()
            .await
            .map_err(|e| CourseBuilderError::Network(format!("{service}: body read failed: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| CourseBuilderError::response_parse(format!("{service}: {e}"), raw))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

// ---------------------------------------------------------------------------
// Contract implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl TextCompletion for HttpAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.completion_model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let response: ChatResponse = self.post_json("completion", "chat/completions", &body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| CourseBuilderError::service("completion", "empty completion"))
    }

    fn model_id(&self) -> &str {
        &self.completion_model
    }
}

#[async_trait]
impl Embedder for HttpAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({ "model": self.embedding_model, "input": text });
        let response: EmbeddingResponse = self.post_json("embedding", "embeddings", &body).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CourseBuilderError::service("embedding", "no embedding returned"))
    }
}

#[async_trait]
impl ImageGenerator for HttpAiClient {
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<GeneratedImage> {
        let started = Instant::now();
        let body = json!({
            "model": self.image_model,
            "prompt": prompt,
            "size": size.to_string(),
            "n": 1,
        });
        let response: ImageResponse = self.post_json("image", "images/generations", &body).await?;
        let image = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| CourseBuilderError::service("image", "no image returned"))?;

        let url = match (image.url, image.b64_json) {
            (Some(url), _) => url,
            (None, Some(b64)) => format!("data:image/png;base64,{b64}"),
            (None, None) => {
                return Err(CourseBuilderError::service("image", "image without url or data"));
            }
        };

        Ok(GeneratedImage {
            url,
            model: self.image_model.clone(),
            generation_time_secs: started.elapsed().as_secs_f64(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpAiClient {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        let body = json!({
            "model": self.speech_model,
            "input": text,
            "voice": voice,
            "response_format": "pcm",
        });
        let response = self.post("speech", "audio/speech", &body).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CourseBuilderError::Network(format!("speech: body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }

    fn sample_rate(&self) -> u32 {
        SPEECH_SAMPLE_RATE
    }
}

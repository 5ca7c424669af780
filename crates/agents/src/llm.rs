//! Text generators backing ticket narratives and mail replies.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use deskside_core::TextGenerator;

pub const DEFAULT_MODEL: &str = "mistral-7b-instruct";

/// Talks to an Ollama-style `/api/generate` endpoint.
#[derive(Debug, Clone)]
pub struct HttpTextGenerator {
    endpoint: String,
    model: String,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl HttpTextGenerator {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            endpoint: endpoint.into(),
            model: model.into(),
            http_client,
        })
    }
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };
        let response = self
            .http_client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("failed to reach text generator at {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("text generator returned HTTP {status}: {body}");
        }

        let body: GenerateResponse = response
            .json()
            .await
            .context("text generator returned an unexpected body")?;
        let text = body.response.trim();
        if text.is_empty() {
            bail!("text generator returned an empty response");
        }
        Ok(text.to_owned())
    }
}

/// Returns the same text for every prompt. Used when no endpoint is configured.
#[derive(Debug, Clone)]
pub struct CannedTextGenerator {
    text: String,
}

impl CannedTextGenerator {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl TextGenerator for CannedTextGenerator {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.text.clone())
    }
}

/// Generate text, substituting `fallback` when the generator fails.
pub async fn generate_or(writer: &dyn TextGenerator, prompt: &str, fallback: &str) -> String {
    match writer.generate(prompt).await {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "text generation failed; using fallback");
            fallback.to_owned()
        }
    }
}

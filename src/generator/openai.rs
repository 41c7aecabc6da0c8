use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::app::{PostflowError, Result};
use crate::config::GeneratorConfig;
use crate::generator::{clean_output, ContentGenerator, Prompt};

const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiGenerator {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_completion_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: &GeneratorConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        let base = if config.api_base.ends_with('/') {
            Url::parse(&config.api_base)?
        } else {
            Url::parse(&format!("{}/", config.api_base))?
        };

        Ok(Self {
            client,
            endpoint: base.join("chat/completions")?,
            api_key: api_key.into(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl ContentGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            max_completion_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Generation request failed: {}", e);
                PostflowError::Generation(
                    "Connection error with OpenAI. Check your internet connection.".to_string(),
                )
            })?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = friendly_error(status, &body);
            tracing::error!("Failed to generate content: {}", message);
            return Err(PostflowError::Generation(message));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| PostflowError::Generation(format!("Unexpected OpenAI response: {}", e)))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PostflowError::Generation("OpenAI returned no choices".to_string()))?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(PostflowError::Generation(content_filter_message()));
        }

        let text = clean_output(choice.message.content.as_deref().unwrap_or_default());
        if text.is_empty() {
            return Err(PostflowError::Generation(
                "OpenAI returned empty content".to_string(),
            ));
        }

        tracing::info!("Generated content successfully ({} chars)", text.chars().count());
        Ok(text)
    }
}

fn content_filter_message() -> String {
    "Content violates OpenAI's usage policies. Try rephrasing your prompt.".to_string()
}

fn friendly_error(status: StatusCode, body: &str) -> String {
    let lower = body.to_lowercase();

    if lower.contains("insufficient_quota") {
        return "OpenAI API quota exceeded. Check your billing.".to_string();
    }
    if status == StatusCode::TOO_MANY_REQUESTS || lower.contains("rate_limit") {
        return "OpenAI rate limit exceeded. Please wait a moment.".to_string();
    }
    if status == StatusCode::UNAUTHORIZED {
        return "OpenAI API key is invalid. Check your configuration.".to_string();
    }
    if lower.contains("content_filter") || lower.contains("content policy") {
        return content_filter_message();
    }

    let snippet: String = body.chars().take(200).collect();
    format!("OpenAI error {}: {}", status.as_u16(), snippet)
}

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::app::Result;
use crate::config::PublisherConfig;
use crate::publisher::{PublishFailure, Publisher};

/// Publishes through the X API v2 with a user-context bearer token.
pub struct XPublisher {
    client: Client,
    tweets_url: Url,
    media_url: Url,
    token: String,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope {
    data: CreatedId,
}

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: String,
}

impl XPublisher {
    pub fn new(config: &PublisherConfig, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("postflow/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            tweets_url: base_url(&config.api_base)?.join("2/tweets")?,
            media_url: base_url(&config.upload_base)?.join("2/media/upload")?,
            token: token.into(),
        })
    }

    async fn upload_media(&self, path: &Path) -> std::result::Result<String, PublishFailure> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            PublishFailure::new(
                "media_unreadable",
                format!("Could not read media file {}: {}", path.display(), e),
                false,
            )
        })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(path))
            .map_err(transport_failure)?;
        let form = Form::new()
            .part("media", part)
            .text("media_category", "tweet_image");

        let response = self
            .client
            .post(self.media_url.clone())
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(transport_failure)?;

        let id = read_created_id(response).await?;
        tracing::debug!("Uploaded media {} as {}", path.display(), id);
        Ok(id)
    }
}

#[async_trait]
impl Publisher for XPublisher {
    async fn publish(
        &self,
        content: &str,
        media: Option<&Path>,
        in_reply_to: Option<&str>,
    ) -> std::result::Result<String, PublishFailure> {
        let mut body = json!({ "text": content });
        if let Some(path) = media {
            let media_id = self.upload_media(path).await?;
            body["media"] = json!({ "media_ids": [media_id] });
        }
        if let Some(parent) = in_reply_to {
            body["reply"] = json!({ "in_reply_to_tweet_id": parent });
        }

        let response = self
            .client
            .post(self.tweets_url.clone())
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(transport_failure)?;

        read_created_id(response).await
    }
}

fn base_url(raw: &str) -> Result<Url> {
    // `Url::join` replaces the last path segment unless the base ends in '/'.
    if raw.ends_with('/') {
        Ok(Url::parse(raw)?)
    } else {
        Ok(Url::parse(&format!("{}/", raw))?)
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

async fn read_created_id(response: reqwest::Response) -> std::result::Result<String, PublishFailure> {
    let status = response.status();
    let body = response.text().await.map_err(transport_failure)?;

    if !status.is_success() {
        return Err(classify(status, &body));
    }

    serde_json::from_str::<DataEnvelope>(&body)
        .map(|envelope| envelope.data.id)
        .map_err(|e| {
            PublishFailure::new(
                "invalid_response",
                format!("Unexpected response from platform: {}", e),
                false,
            )
        })
}

fn transport_failure(e: reqwest::Error) -> PublishFailure {
    if e.is_timeout() || e.is_connect() {
        PublishFailure::new("connection", format!("Connection error: {}", e), true)
    } else {
        PublishFailure::new("transport", format!("Request failed: {}", e), true)
    }
}

/// Turn a non-success response into an operator-readable failure.
fn classify(status: StatusCode, body: &str) -> PublishFailure {
    let lower = body.to_lowercase();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return PublishFailure::new(
            "rate_limited",
            "Rate limit exceeded. Please wait before posting again.",
            true,
        );
    }
    if lower.contains("duplicate") {
        return PublishFailure::new("duplicate", "This post appears to be a duplicate.", false);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return PublishFailure::new(
            "unauthorized",
            "Authentication failed. Check your API credentials.",
            false,
        );
    }
    if lower.contains("too long") || lower.contains("length") {
        return PublishFailure::new(
            "too_long",
            "Post exceeds the platform's length limit.",
            false,
        );
    }
    if status.is_server_error() {
        return PublishFailure::new(
            "unavailable",
            "Publishing platform temporarily unavailable.",
            true,
        );
    }

    let snippet: String = body.chars().take(200).collect();
    PublishFailure::new(
        format!("http_{}", status.as_u16()),
        format!("Platform error {}: {}", status.as_u16(), snippet),
        false,
    )
}

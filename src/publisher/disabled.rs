use std::path::Path;

use async_trait::async_trait;

use crate::publisher::{PublishFailure, Publisher};

/// Stand-in used when no platform credentials are configured. Every attempt
/// fails, so posts end up `failed` with a readable reason instead of vanishing.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPublisher;

#[async_trait]
impl Publisher for DisabledPublisher {
    async fn publish(
        &self,
        _content: &str,
        _media: Option<&Path>,
        _in_reply_to: Option<&str>,
    ) -> Result<String, PublishFailure> {
        Err(PublishFailure::new(
            "disabled",
            "Publishing platform is not configured",
            false,
        ))
    }
}

use async_trait::async_trait;

use crate::app::{PostflowError, Result};
use crate::generator::{ContentGenerator, Prompt};

/// Used when no API key is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledGenerator;

#[async_trait]
impl ContentGenerator for DisabledGenerator {
    async fn generate(&self, _prompt: &Prompt) -> Result<String> {
        Err(PostflowError::Generation(
            "AI generation is not configured (set OPENAI_API_KEY)".to_string(),
        ))
    }
}

//! AI text generation for post drafts.
//!
//! Generated text is only ever returned to the caller. Nothing here touches a
//! stored post, so a failed generation leaves no trace.

pub mod disabled;
pub mod openai;

pub use disabled::DisabledGenerator;
pub use openai::OpenAiGenerator;

use async_trait::async_trait;
use clap::ValueEnum;

use crate::app::Result;

/// Tone requested from the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Style {
    #[default]
    Professional,
    Casual,
    Funny,
    Inspirational,
    Educational,
}

impl Style {
    fn instruction(self) -> &'static str {
        match self {
            Style::Professional => "Use a professional and informative tone.",
            Style::Casual => "Use a casual and friendly tone.",
            Style::Funny => "Use humor and wit to make it entertaining.",
            Style::Inspirational => "Use an inspirational and motivational tone.",
            Style::Educational => "Use a clear and educational tone.",
        }
    }
}

/// A system/user message pair sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn post(request: &str, max_len: Option<usize>, style: Style) -> Self {
        let mut system = String::from(
            "You are a professional social media content creator. \
             Create engaging, clear, and effective posts for Twitter/X. ",
        );
        if let Some(max_len) = max_len {
            system.push_str(&format!("Keep the content under {} characters. ", max_len));
        }
        system.push_str(style.instruction());
        system.push_str(
            " Do not add hashtags unless specifically requested. \
             Provide ONLY the post content, no explanations.",
        );

        Self {
            system,
            user: request.to_string(),
        }
    }

    pub fn topic(label: &str, max_len: usize) -> Self {
        let request = format!(
            "Generate a professional and engaging single post for Twitter/X about: {label}\n\n\
             The post must be {max_len} characters or fewer and should not be a thread.\n\n\
             The post should:\n\
             - Be informative and provide value\n\
             - Have a professional yet approachable tone\n\
             - Include an interesting fact or insight\n\
             - May start with an appropriate emoji\n\
             - Be engaging to capture attention\n\n\
             Create quality content that the audience will find valuable."
        );
        Self::post(&request, Some(max_len), Style::Professional)
    }

    pub fn improve(content: &str, instruction: &str) -> Self {
        Self {
            system: "You are a social media expert. Improve the given post while maintaining \
                     its core message. Make it more engaging, clear, and effective. \
                     Don't add hashtags unless they were in the original."
                .to_string(),
            user: format!("Improve this post ({}):\n\n{}", instruction, content),
        }
    }
}

/// Opaque "generate text from prompt" collaborator.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, prompt: &Prompt) -> Result<String>;

    async fn generate_post(&self, request: &str, max_len: Option<usize>, style: Style) -> Result<String> {
        self.generate(&Prompt::post(request, max_len, style)).await
    }

    async fn generate_for_topic(&self, label: &str, max_len: usize) -> Result<String> {
        self.generate(&Prompt::topic(label, max_len)).await
    }

    async fn improve(&self, content: &str, instruction: &str) -> Result<String> {
        self.generate(&Prompt::improve(content, instruction)).await
    }
}

/// Trim model output and drop one pair of wrapping double quotes.
pub fn clean_output(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(trimmed)
        .to_string()
}

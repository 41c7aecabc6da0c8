pub mod disabled;
pub mod x;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub use disabled::DisabledPublisher;
pub use x::XPublisher;

/// Why the publishing platform refused or never received a post.
///
/// `retriable` is informational; nothing retries automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PublishFailure {
    pub code: String,
    pub message: String,
    pub retriable: bool,
}

impl PublishFailure {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retriable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retriable,
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one unit of content and return the platform-assigned id.
    ///
    /// `in_reply_to` chains the unit under an earlier one to form a thread.
    async fn publish(
        &self,
        content: &str,
        media: Option<&Path>,
        in_reply_to: Option<&str>,
    ) -> Result<String, PublishFailure>;
}

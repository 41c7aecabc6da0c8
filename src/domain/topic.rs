use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_TOPICS_PER_OWNER: usize = 10;
pub const MIN_LABEL_CHARS: usize = 3;
pub const MAX_LABEL_CHARS: usize = 30;

/// A saved label used to seed content-generation prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicPreset {
    pub id: i64,
    pub owner: i64,
    pub label: String,
    pub created_at: DateTime<Utc>,
}

/// Trim a label and check its length. Returns the trimmed label.
pub fn normalize_label(label: &str) -> Result<&str, String> {
    let label = label.trim();
    let len = label.chars().count();
    if len < MIN_LABEL_CHARS {
        return Err(format!(
            "Topic label must be at least {} characters",
            MIN_LABEL_CHARS
        ));
    }
    if len > MAX_LABEL_CHARS {
        return Err(format!(
            "Topic label must be at most {} characters",
            MAX_LABEL_CHARS
        ));
    }
    Ok(label)
}

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a post is in its lifecycle.
///
/// `Draft` and `Failed` can be edited and resubmitted; `Published` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub const ALL: [PostStatus; 4] = [
        PostStatus::Draft,
        PostStatus::Scheduled,
        PostStatus::Published,
        PostStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    /// Draft and failed posts may be edited, scheduled or published again.
    pub fn is_resubmittable(&self) -> bool {
        matches!(self, PostStatus::Draft | PostStatus::Failed)
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "published" => Ok(PostStatus::Published),
            "failed" => Ok(PostStatus::Failed),
            other => Err(format!("Unknown post status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub content: String,
    pub media_ref: Option<PathBuf>,
    pub status: PostStatus,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
    pub platform_id: Option<String>,
    pub created_by_ai: bool,
    pub ai_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    pub fn preview(&self, max_chars: usize) -> String {
        if self.content.chars().count() <= max_chars {
            return self.content.clone();
        }
        let mut preview: String = self.content.chars().take(max_chars).collect();
        preview.push_str("...");
        preview
    }

    pub fn has_media(&self) -> bool {
        self.media_ref.is_some()
    }
}

/// Input for creating a post.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub content: String,
    pub media_ref: Option<PathBuf>,
    pub due: Option<DateTime<Utc>>,
    pub created_by_ai: bool,
    pub ai_prompt: Option<String>,
}

impl NewPost {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_media(mut self, path: impl Into<PathBuf>) -> Self {
        self.media_ref = Some(path.into());
        self
    }

    pub fn due_at(mut self, due: DateTime<Utc>) -> Self {
        self.due = Some(due);
        self
    }

    pub fn generated_from(mut self, prompt: impl Into<String>) -> Self {
        self.created_by_ai = true;
        self.ai_prompt = Some(prompt.into());
        self
    }
}

/// One segment of a thread that the platform accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedSegment {
    pub position: usize,
    pub content: String,
    pub platform_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostStats {
    pub draft: i64,
    pub scheduled: i64,
    pub published: i64,
    pub failed: i64,
}

impl PostStats {
    pub fn total(&self) -> i64 {
        self.draft + self.scheduled + self.published + self.failed
    }
}

/// Offset/limit window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Page {
    pub const DEFAULT_LIMIT: usize = 10;

    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    pub fn first(limit: usize) -> Self {
        Self { offset: 0, limit }
    }

    pub fn number(page: usize, limit: usize) -> Self {
        Self {
            offset: page.saturating_sub(1) * limit,
            limit,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(Self::DEFAULT_LIMIT)
    }
}

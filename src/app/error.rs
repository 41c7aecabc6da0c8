use thiserror::Error;

use crate::domain::PostStatus;

#[derive(Error, Debug)]
pub enum PostflowError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Post not found: {0}")]
    PostNotFound(i64),

    #[error("Topic not found: {0}")]
    TopicNotFound(i64),

    #[error("Cannot {action} post {id} while it is {status}")]
    InvalidTransition {
        id: i64,
        status: PostStatus,
        action: &'static str,
    },

    #[error("Post {0} is no longer scheduled")]
    NotScheduled(i64),

    #[error("Content generation failed: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl PostflowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PostflowError>;

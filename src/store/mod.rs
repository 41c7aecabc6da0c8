pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::app::Result;
use crate::domain::{Page, Post, PostStats, PostStatus, PublishedSegment, TopicPreset};

pub use sqlite::SqliteStore;

/// Persistence for posts and topic presets.
///
/// Every post mutation touches a single row; callers outside the lifecycle
/// coordinator should only read.
pub trait Store: Send + Sync {
    // Post operations
    fn insert_post(&self, post: &Post) -> Result<i64>;
    fn get_post(&self, id: i64) -> Result<Option<Post>>;
    fn update_post(&self, post: &Post) -> Result<()>;
    fn delete_post(&self, id: i64) -> Result<bool>;

    // Post queries
    fn scheduled_posts(&self) -> Result<Vec<Post>>;
    fn posts_by_status(&self, status: PostStatus, page: Page) -> Result<Vec<Post>>;
    fn recent_posts(&self, page: Page) -> Result<Vec<Post>>;
    fn post_stats(&self) -> Result<PostStats>;

    // Thread segment operations
    fn record_segment(&self, post_id: i64, segment: &PublishedSegment) -> Result<()>;
    fn segments(&self, post_id: i64) -> Result<Vec<PublishedSegment>>;
    fn clear_segments(&self, post_id: i64) -> Result<()>;

    // Topic preset operations
    fn add_topic(&self, owner: i64, label: &str, created_at: DateTime<Utc>)
        -> Result<TopicPreset>;
    fn topics(&self, owner: i64) -> Result<Vec<TopicPreset>>;
    fn get_topic(&self, owner: i64, id: i64) -> Result<Option<TopicPreset>>;
    fn delete_topic(&self, owner: i64, id: i64) -> Result<bool>;
    fn delete_all_topics(&self, owner: i64) -> Result<usize>;
    fn topic_count(&self, owner: i64) -> Result<usize>;
}

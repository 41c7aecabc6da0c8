pub mod post;
pub mod topic;

pub use post::{NewPost, Page, Post, PostStats, PostStatus, PublishedSegment};
pub use topic::TopicPreset;

use crate::domain::{Post, PublishedSegment};
use crate::publisher::{PublishFailure, Publisher};
use crate::splitter;
use crate::store::Store;

/// What one publish attempt achieved.
#[derive(Debug)]
pub struct AttemptOutcome {
    pub published: Vec<PublishedSegment>,
    pub total: usize,
    pub failure: Option<PublishFailure>,
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Platform id of the thread head, if it went out.
    pub fn head_id(&self) -> Option<&str> {
        self.published.first().map(|s| s.platform_id.as_str())
    }

    /// Operator-facing summary of a failed attempt.
    pub fn failure_detail(&self) -> Option<String> {
        let failure = self.failure.as_ref()?;
        if self.total <= 1 {
            return Some(failure.message.clone());
        }
        let done = self.published.len();
        Some(format!(
            "Segment {} of {} failed after {} published: {}",
            done + 1,
            self.total,
            done,
            failure.message
        ))
    }
}

/// Publish `post` as a single unit or as a reply chain.
///
/// Media posts go out once with the media attached. Text posts are split and
/// every segment after the first replies to the previous one; the chain stops
/// at the first failure. Accepted segments are recorded as they land.
pub async fn publish_post(
    publisher: &dyn Publisher,
    store: &dyn Store,
    post: &Post,
    unit_limit: usize,
) -> AttemptOutcome {
    let segments = if post.has_media() {
        vec![post.content.clone()]
    } else {
        splitter::split(&post.content, unit_limit)
    };
    let total = segments.len();
    let mut published: Vec<PublishedSegment> = Vec::with_capacity(total);

    for (index, content) in segments.into_iter().enumerate() {
        let media = if index == 0 {
            post.media_ref.as_deref()
        } else {
            None
        };
        let parent = published.last().map(|s| s.platform_id.as_str());

        let result = publisher.publish(&content, media, parent).await;
        match result {
            Ok(platform_id) => {
                let segment = PublishedSegment {
                    position: index + 1,
                    content,
                    platform_id,
                };
                if let Err(e) = store.record_segment(post.id, &segment) {
                    // The segment is public either way.
                    tracing::warn!(
                        "Failed to record segment {} of post {}: {}",
                        segment.position,
                        post.id,
                        e
                    );
                }
                published.push(segment);
            }
            Err(failure) => {
                tracing::error!(
                    "Post {} segment {}/{} rejected ({}): {}",
                    post.id,
                    index + 1,
                    total,
                    failure.code,
                    failure.message
                );
                return AttemptOutcome {
                    published,
                    total,
                    failure: Some(failure),
                };
            }
        }
    }

    AttemptOutcome {
        published,
        total,
        failure: None,
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

use crate::app::{PostflowError, Result};
use crate::domain::{NewPost, Page, Post, PostStats, PostStatus, PublishedSegment};
use crate::lifecycle::attempt;
use crate::notifier::{LifecycleEvent, Notifier};
use crate::publisher::Publisher;
use crate::scheduler::{Clock, FiredJob, SchedulingEngine};
use crate::splitter::{self, SplitLimits};
use crate::store::sqlite::storage_precision;
use crate::store::Store;

/// Tunables for authoring validation and scheduling.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleSettings {
    pub limits: SplitLimits,
    /// Due times must be strictly later than `now + min_lead`.
    pub min_lead: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            limits: SplitLimits::default(),
            min_lead: Duration::zero(),
        }
    }
}

/// What a rehydration pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RehydrationReport {
    /// Overdue posts that published.
    pub published: usize,
    /// Overdue posts whose attempt failed.
    pub failed: usize,
    /// Future posts that (re)acquired a job.
    pub registered: usize,
    /// Scheduled rows without a due time, moved back to draft.
    pub repaired: usize,
}

/// The only component that changes a post's status.
///
/// Every transition for a post runs under that post's async lock, so an
/// operator action and a timer fire on the same post never interleave.
/// Different posts proceed concurrently.
pub struct Coordinator {
    store: Arc<dyn Store>,
    engine: SchedulingEngine,
    publisher: Arc<dyn Publisher>,
    notifier: Arc<dyn Notifier>,
    settings: LifecycleSettings,
    locks: PostLocks,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type PostLocks = Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>;

/// Holds one post's lock. On release the map entry is dropped unless another
/// caller is holding or waiting for it, so settled posts leave nothing behind.
struct PostGuard<'a> {
    locks: &'a PostLocks,
    id: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PostGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = locked(self.locks);
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

impl Coordinator {
    /// Build the coordinator and start the task that turns fired jobs into
    /// publish attempts. Must be called inside a tokio runtime.
    pub fn start(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn Publisher>,
        notifier: Arc<dyn Notifier>,
        settings: LifecycleSettings,
    ) -> Arc<Self> {
        let (engine, fired_rx) = SchedulingEngine::new(clock);
        let coordinator = Arc::new(Self {
            store,
            engine,
            publisher,
            notifier,
            settings,
            locks: Mutex::new(HashMap::new()),
            dispatcher: Mutex::new(None),
        });

        let task = tokio::spawn(dispatch(Arc::downgrade(&coordinator), fired_rx));
        *locked(&coordinator.dispatcher) = Some(task);
        coordinator
    }

    pub fn engine(&self) -> &SchedulingEngine {
        &self.engine
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Current time on the coordinator's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.engine.clock().now()
    }

    async fn lock_post(&self, id: i64) -> PostGuard<'_> {
        let lock = locked(&self.locks).entry(id).or_default().clone();
        PostGuard {
            locks: &self.locks,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        locked(&self.locks).len()
    }

    fn load(&self, id: i64) -> Result<Post> {
        self.store
            .get_post(id)?
            .ok_or(PostflowError::PostNotFound(id))
    }

    fn validate_content(&self, content: &str, has_media: bool) -> Result<()> {
        splitter::check(content, self.settings.limits, has_media)
            .map(|_| ())
            .map_err(|e| PostflowError::validation(e.to_string()))
    }

    fn validate_due(&self, due: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let due = storage_precision(due);
        let earliest = self.now() + self.settings.min_lead;
        if due <= earliest {
            return Err(PostflowError::validation(format!(
                "Due time {} must be after {}",
                due.to_rfc3339_opts(SecondsFormat::Secs, true),
                earliest.to_rfc3339_opts(SecondsFormat::Secs, true)
            )));
        }
        Ok(due)
    }

    /// Persist a new post as a draft, or as scheduled when a due time is given.
    pub async fn create(&self, new: NewPost) -> Result<Post> {
        self.validate_content(&new.content, new.media_ref.is_some())?;
        let due = new.due.map(|due| self.validate_due(due)).transpose()?;

        let now = self.now();
        let mut post = Post {
            id: 0,
            content: new.content,
            media_ref: new.media_ref,
            status: if due.is_some() {
                PostStatus::Scheduled
            } else {
                PostStatus::Draft
            },
            scheduled_at: due,
            published_at: None,
            error_detail: None,
            platform_id: None,
            created_by_ai: new.created_by_ai,
            ai_prompt: new.ai_prompt,
            created_at: now,
            updated_at: now,
        };
        post.id = self.store.insert_post(&post)?;

        match due {
            Some(due) => {
                self.engine.schedule(post.id, due);
                tracing::info!("Post {} created, scheduled for {}", post.id, due);
            }
            None => tracing::info!("Post {} created as draft", post.id),
        }
        Ok(post)
    }

    /// Replace the content of a draft or failed post.
    pub async fn edit(&self, id: i64, content: String) -> Result<Post> {
        let _guard = self.lock_post(id).await;

        let mut post = self.load(id)?;
        if !post.status.is_resubmittable() {
            return Err(PostflowError::InvalidTransition {
                id,
                status: post.status,
                action: "edit",
            });
        }
        self.validate_content(&content, post.has_media())?;

        post.content = content;
        post.updated_at = self.now();
        self.store.update_post(&post)?;
        tracing::info!("Post {} edited", id);
        Ok(post)
    }

    pub async fn schedule(&self, id: i64, due: DateTime<Utc>) -> Result<Post> {
        let _guard = self.lock_post(id).await;

        let mut post = self.load(id)?;
        if !post.status.is_resubmittable() {
            return Err(PostflowError::InvalidTransition {
                id,
                status: post.status,
                action: "schedule",
            });
        }
        let due = self.validate_due(due)?;

        post.status = PostStatus::Scheduled;
        post.scheduled_at = Some(due);
        post.error_detail = None;
        post.updated_at = self.now();
        self.store.update_post(&post)?;
        self.engine.schedule(id, due);

        tracing::info!("Post {} scheduled for {}", id, due);
        Ok(post)
    }

    pub async fn reschedule(&self, id: i64, due: DateTime<Utc>) -> Result<Post> {
        let _guard = self.lock_post(id).await;

        let mut post = self.load(id)?;
        if post.status != PostStatus::Scheduled {
            return Err(PostflowError::NotScheduled(id));
        }
        let due = self.validate_due(due)?;

        post.scheduled_at = Some(due);
        post.error_detail = None;
        post.updated_at = self.now();
        self.store.update_post(&post)?;
        self.engine.reschedule(id, due);

        tracing::info!("Post {} rescheduled for {}", id, due);
        Ok(post)
    }

    /// Send a scheduled post back to draft.
    pub async fn cancel(&self, id: i64) -> Result<Post> {
        let _guard = self.lock_post(id).await;

        let mut post = self.load(id)?;
        if post.status != PostStatus::Scheduled {
            return Err(PostflowError::NotScheduled(id));
        }

        post.status = PostStatus::Draft;
        post.scheduled_at = None;
        post.updated_at = self.now();
        self.store.update_post(&post)?;
        self.engine.cancel(id);

        tracing::info!("Post {} cancelled, back to draft", id);
        Ok(post)
    }

    /// Publish a draft or failed post right away and wait for the outcome.
    pub async fn publish_now(&self, id: i64) -> Result<Post> {
        let guard = self.lock_post(id).await;

        let post = self.load(id)?;
        if !post.status.is_resubmittable() {
            return Err(PostflowError::InvalidTransition {
                id,
                status: post.status,
                action: "publish",
            });
        }

        let (post, event) = self.run_attempt(post).await?;
        drop(guard);

        self.notify(event);
        Ok(post)
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let guard = self.lock_post(id).await;

        let post = self.load(id)?;
        if post.status == PostStatus::Published {
            return Err(PostflowError::InvalidTransition {
                id,
                status: post.status,
                action: "delete",
            });
        }

        self.store.delete_post(id)?;
        self.engine.cancel(id);
        drop(guard);

        tracing::info!("Post {} deleted", id);
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Post> {
        self.load(id)
    }

    pub fn list(&self, status: PostStatus, page: Page) -> Result<Vec<Post>> {
        self.store.posts_by_status(status, page)
    }

    pub fn recent(&self, page: Page) -> Result<Vec<Post>> {
        self.store.recent_posts(page)
    }

    pub fn scheduled(&self) -> Result<Vec<Post>> {
        self.store.scheduled_posts()
    }

    pub fn stats(&self) -> Result<PostStats> {
        self.store.post_stats()
    }

    pub fn segments(&self, id: i64) -> Result<Vec<PublishedSegment>> {
        self.load(id)?;
        self.store.segments(id)
    }

    /// How the post's content would go out if published now.
    pub fn preview_split(&self, post: &Post) -> Vec<String> {
        if post.has_media() {
            vec![post.content.clone()]
        } else {
            splitter::split(&post.content, self.settings.limits.unit_limit)
        }
    }

    /// Rebuild jobs from persisted due times.
    ///
    /// Overdue posts publish one after another in ascending due order; future
    /// posts get exactly one job each. Safe to run more than once.
    pub async fn rehydrate(&self) -> Result<RehydrationReport> {
        let pending = self.store.scheduled_posts()?;
        let mut report = RehydrationReport::default();

        for candidate in pending {
            let id = candidate.id;
            let guard = self.lock_post(id).await;

            // Re-read under the lock: an operator action may have moved it.
            let mut post = match self.store.get_post(id)? {
                Some(post) if post.status == PostStatus::Scheduled => post,
                _ => continue,
            };

            let now = self.now();
            match post.scheduled_at {
                None => {
                    tracing::warn!("Post {} is scheduled without a due time", id);
                    post.status = PostStatus::Draft;
                    post.error_detail =
                        Some("Scheduled without a due time; moved back to draft".to_string());
                    post.updated_at = now;
                    self.store.update_post(&post)?;
                    self.engine.cancel(id);
                    report.repaired += 1;
                }
                Some(due) if due <= now => {
                    tracing::info!("Post {} missed its due time {}, publishing now", id, due);
                    self.engine.cancel(id);
                    let (post, event) = self.run_attempt(post).await?;
                    drop(guard);

                    if post.status == PostStatus::Published {
                        report.published += 1;
                    } else {
                        report.failed += 1;
                    }
                    self.notify(event);
                }
                Some(due) => {
                    self.engine.schedule(id, due);
                    report.registered += 1;
                }
            }
        }

        tracing::info!(
            "Rehydrated: {} published, {} failed, {} pending, {} repaired",
            report.published,
            report.failed,
            report.registered,
            report.repaired
        );
        Ok(report)
    }

    /// Run a publish attempt and commit its outcome. Caller holds the post lock.
    async fn run_attempt(&self, mut post: Post) -> Result<(Post, LifecycleEvent)> {
        self.store.clear_segments(post.id)?;

        let outcome = attempt::publish_post(
            self.publisher.as_ref(),
            self.store.as_ref(),
            &post,
            self.settings.limits.unit_limit,
        )
        .await;

        let now = self.now();
        post.updated_at = now;
        post.platform_id = outcome.head_id().map(String::from);

        let event = match outcome.failure_detail() {
            None => {
                post.status = PostStatus::Published;
                post.published_at = Some(now);
                post.error_detail = None;
                tracing::info!("Post {} published ({} segments)", post.id, outcome.total);
                LifecycleEvent::Published {
                    post_id: post.id,
                    platform_id: post.platform_id.clone().unwrap_or_default(),
                    segments: outcome.total,
                }
            }
            Some(detail) => {
                post.status = PostStatus::Failed;
                post.error_detail = Some(detail.clone());
                tracing::error!("Post {} failed: {}", post.id, detail);
                LifecycleEvent::Failed {
                    post_id: post.id,
                    detail,
                }
            }
        };

        self.store.update_post(&post)?;
        Ok((post, event))
    }

    /// Hand the event to the notifier without waiting for it.
    fn notify(&self, event: LifecycleEvent) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&event).await {
                tracing::warn!("Notifier failed for post {}: {}", event.post_id(), e);
            }
        });
    }

    fn stale_reason(&self, post: &Post, fired: &FiredJob) -> Option<String> {
        if post.status != PostStatus::Scheduled {
            return Some(format!("post is {}", post.status));
        }
        if let Some(live) = self.engine.handle_of(post.id) {
            if live != fired.handle {
                return Some("a newer job is registered".to_string());
            }
        }
        if post.scheduled_at != Some(fired.fire_at) {
            return Some("due time changed".to_string());
        }
        None
    }

    pub(crate) async fn handle_fire(&self, fired: FiredJob) {
        let id = fired.post_id;
        let guard = self.lock_post(id).await;

        let post = match self.store.get_post(id) {
            Ok(Some(post)) => post,
            Ok(None) => {
                tracing::warn!("Dropping fire for post {}: it no longer exists", id);
                return;
            }
            Err(e) => {
                tracing::error!("Dropping fire for post {}: {}", id, e);
                return;
            }
        };

        if let Some(reason) = self.stale_reason(&post, &fired) {
            tracing::warn!("Dropping stale fire for post {}: {}", id, reason);
            return;
        }

        let result = self.run_attempt(post).await;
        drop(guard);

        match result {
            Ok((_, event)) => self.notify(event),
            Err(e) => tracing::error!("Failed to record outcome for post {}: {}", id, e),
        }
    }

    /// Stop timers and the dispatcher. Pending posts stay scheduled in the
    /// store and are picked up by the next rehydration.
    pub fn shutdown(&self) {
        self.engine.shutdown();
        if let Some(task) = locked(&self.dispatcher).take() {
            task.abort();
        }
    }
}

async fn dispatch(coordinator: Weak<Coordinator>, mut fired_rx: UnboundedReceiver<FiredJob>) {
    while let Some(fired) = fired_rx.recv().await {
        let Some(coordinator) = coordinator.upgrade() else {
            break;
        };
        tokio::spawn(async move { coordinator.handle_fire(fired).await });
    }
    tracing::debug!("Fire dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::TimeZone;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::publisher::PublishFailure;
    use crate::scheduler::ManualClock;
    use crate::store::SqliteStore;

    type Call = (String, Option<PathBuf>, Option<String>);

    #[derive(Default)]
    struct FakePublisher {
        calls: Mutex<Vec<Call>>,
        fail_on: Option<usize>,
    }

    impl FakePublisher {
        fn failing_on(call: usize) -> Self {
            Self {
                fail_on: Some(call),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(
            &self,
            content: &str,
            media: Option<&Path>,
            in_reply_to: Option<&str>,
        ) -> std::result::Result<String, PublishFailure> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((
                content.to_string(),
                media.map(Path::to_path_buf),
                in_reply_to.map(String::from),
            ));
            let n = calls.len();
            if self.fail_on == Some(n) {
                return Err(PublishFailure::new("rejected", "Platform said no", false));
            }
            Ok(format!("p{}", n))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: Mutex<Vec<LifecycleEvent>>,
    }

    impl RecordingNotifier {
        fn events(&self) -> Vec<LifecycleEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: &LifecycleEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _event: &LifecycleEvent) -> Result<()> {
            Err(PostflowError::Other("chat is down".into()))
        }
    }

    /// Never answers, like a chat API that hangs until its timeout.
    struct StalledNotifier;

    #[async_trait]
    impl Notifier for StalledNotifier {
        async fn notify(&self, _event: &LifecycleEvent) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn start_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap()
    }

    fn numbered_sentences(count: usize) -> String {
        (1..=count)
            .map(|n| format!("This is sentence number {:02} of the test.", n))
            .collect::<Vec<_>>()
            .join(" ")
    }

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<SqliteStore>,
        publisher: Arc<FakePublisher>,
        notifier: Arc<RecordingNotifier>,
        coordinator: Arc<Coordinator>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_publisher(FakePublisher::default())
        }

        fn with_publisher(publisher: FakePublisher) -> Self {
            let clock = Arc::new(ManualClock::new(start_time()));
            let store = Arc::new(SqliteStore::in_memory().unwrap());
            let publisher = Arc::new(publisher);
            let notifier = Arc::new(RecordingNotifier::default());
            let coordinator = Coordinator::start(
                store.clone(),
                clock.clone(),
                publisher.clone(),
                notifier.clone(),
                LifecycleSettings::default(),
            );
            Self {
                clock,
                store,
                publisher,
                notifier,
                coordinator,
            }
        }

        fn post(&self, id: i64) -> Post {
            self.store.get_post(id).unwrap().unwrap()
        }

        /// Write a scheduled row directly, as a previous process would have left it.
        fn persisted_scheduled(&self, content: &str, due: Option<DateTime<Utc>>) -> i64 {
            let post = Post {
                id: 0,
                content: content.into(),
                media_ref: None,
                status: PostStatus::Scheduled,
                scheduled_at: due,
                published_at: None,
                error_detail: None,
                platform_id: None,
                created_by_ai: false,
                ai_prompt: None,
                created_at: start_time() - Duration::days(1),
                updated_at: start_time() - Duration::days(1),
            };
            self.store.insert_post(&post).unwrap()
        }

        fn contents_published(&self) -> Vec<String> {
            self.publisher.calls().into_iter().map(|c| c.0).collect()
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(StdDuration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn settle() {
        tokio::time::sleep(StdDuration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_create_with_future_due_registers_one_job() {
        let h = Harness::new();
        let due = start_time() + Duration::hours(1);
        let post = h
            .coordinator
            .create(NewPost::new("hello").due_at(due))
            .await
            .unwrap();

        assert_eq!(post.status, PostStatus::Scheduled);
        assert_eq!(h.post(post.id).scheduled_at, Some(due));
        assert!(h.coordinator.engine().is_live(post.id));
        assert_eq!(h.coordinator.engine().live_count(), 1);
        assert_eq!(h.coordinator.engine().fire_at(post.id), Some(due));
    }

    #[tokio::test]
    async fn test_create_without_due_is_draft() {
        let h = Harness::new();
        let post = h.coordinator.create(NewPost::new("hello")).await.unwrap();
        assert_eq!(post.status, PostStatus::Draft);
        assert!(post.scheduled_at.is_none());
        assert_eq!(h.coordinator.engine().live_count(), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_due_not_in_future() {
        let h = Harness::new();
        for due in [start_time(), start_time() - Duration::minutes(5)] {
            let result = h.coordinator.create(NewPost::new("hello").due_at(due)).await;
            assert!(matches!(result, Err(PostflowError::Validation(_))));
        }
        assert_eq!(h.coordinator.stats().unwrap().total(), 0);
        assert_eq!(h.coordinator.engine().live_count(), 0);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_content() {
        let h = Harness::new();
        let result = h.coordinator.create(NewPost::new("   ")).await;
        assert!(matches!(result, Err(PostflowError::Validation(_))));

        let long_media = NewPost::new("m".repeat(300)).with_media("/tmp/a.png");
        let result = h.coordinator.create(long_media).await;
        assert!(matches!(result, Err(PostflowError::Validation(_))));
        assert_eq!(h.coordinator.stats().unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_min_lead_is_enforced() {
        let clock = Arc::new(ManualClock::new(start_time()));
        let coordinator = Coordinator::start(
            Arc::new(SqliteStore::in_memory().unwrap()),
            clock,
            Arc::new(FakePublisher::default()),
            Arc::new(RecordingNotifier::default()),
            LifecycleSettings {
                min_lead: Duration::minutes(5),
                ..Default::default()
            },
        );

        let too_soon = NewPost::new("x").due_at(start_time() + Duration::minutes(5));
        assert_err!(coordinator.create(too_soon).await);
        let fine = NewPost::new("x").due_at(start_time() + Duration::minutes(6));
        assert_ok!(coordinator.create(fine).await);
    }

    #[tokio::test]
    async fn test_schedule_then_cancel_returns_to_draft() {
        let h = Harness::new();
        let id = h.coordinator.create(NewPost::new("hello")).await.unwrap().id;

        h.coordinator
            .schedule(id, start_time() + Duration::hours(1))
            .await
            .unwrap();
        assert!(h.coordinator.engine().is_live(id));

        let post = h.coordinator.cancel(id).await.unwrap();
        assert_eq!(post.status, PostStatus::Draft);
        assert!(post.scheduled_at.is_none());
        assert_eq!(h.post(id).status, PostStatus::Draft);
        assert!(h.post(id).scheduled_at.is_none());
        assert!(!h.coordinator.engine().is_live(id));
        assert_eq!(h.coordinator.engine().live_count(), 0);

        h.clock.advance(Duration::hours(2));
        settle().await;
        assert!(h.publisher.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_requires_scheduled() {
        let h = Harness::new();
        let id = h.coordinator.create(NewPost::new("hello")).await.unwrap().id;
        assert!(matches!(
            h.coordinator.cancel(id).await,
            Err(PostflowError::NotScheduled(_))
        ));
        assert!(matches!(
            h.coordinator.cancel(999).await,
            Err(PostflowError::PostNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_reschedule_moves_the_single_job() {
        let h = Harness::new();
        let id = h
            .coordinator
            .create(NewPost::new("hello").due_at(start_time() + Duration::hours(1)))
            .await
            .unwrap()
            .id;

        let later = start_time() + Duration::hours(3);
        h.coordinator.reschedule(id, later).await.unwrap();
        assert_eq!(h.coordinator.engine().live_count(), 1);
        assert_eq!(h.coordinator.engine().fire_at(id), Some(later));
        assert_eq!(h.post(id).scheduled_at, Some(later));

        h.clock.advance(Duration::hours(1));
        settle().await;
        assert!(h.publisher.calls().is_empty());
        assert_eq!(h.post(id).status, PostStatus::Scheduled);

        h.clock.advance(Duration::hours(2));
        eventually(|| h.post(id).status == PostStatus::Published).await;
        assert_eq!(h.publisher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_reschedule_rejections_keep_existing_job() {
        let h = Harness::new();
        let draft = h.coordinator.create(NewPost::new("draft")).await.unwrap().id;
        assert!(matches!(
            h.coordinator.reschedule(draft, start_time() + Duration::hours(1)).await,
            Err(PostflowError::NotScheduled(_))
        ));

        let due = start_time() + Duration::hours(1);
        let id = h
            .coordinator
            .create(NewPost::new("scheduled").due_at(due))
            .await
            .unwrap()
            .id;
        let result = h
            .coordinator
            .reschedule(id, start_time() - Duration::minutes(1))
            .await;
        assert!(matches!(result, Err(PostflowError::Validation(_))));
        assert_eq!(h.coordinator.engine().fire_at(id), Some(due));
        assert_eq!(h.post(id).scheduled_at, Some(due));
    }

    #[tokio::test]
    async fn test_fired_job_publishes_and_notifies() {
        let h = Harness::new();
        let id = h
            .coordinator
            .create(NewPost::new("hello").due_at(start_time() + Duration::minutes(10)))
            .await
            .unwrap()
            .id;

        h.clock.advance(Duration::minutes(10));
        eventually(|| !h.notifier.events().is_empty()).await;

        let post = h.post(id);
        assert_eq!(post.status, PostStatus::Published);
        assert_eq!(post.published_at, Some(h.clock.now()));
        assert_eq!(post.platform_id.as_deref(), Some("p1"));
        assert!(post.error_detail.is_none());
        assert!(!h.coordinator.engine().is_live(id));
        assert_eq!(
            h.notifier.events(),
            vec![LifecycleEvent::Published {
                post_id: id,
                platform_id: "p1".into(),
                segments: 1,
            }]
        );
    }

    #[tokio::test]
    async fn test_publish_now_only_from_draft_or_failed() {
        let h = Harness::new();
        let scheduled = h
            .coordinator
            .create(NewPost::new("later").due_at(start_time() + Duration::hours(1)))
            .await
            .unwrap()
            .id;
        assert!(matches!(
            h.coordinator.publish_now(scheduled).await,
            Err(PostflowError::InvalidTransition { action: "publish", .. })
        ));

        let draft = h.coordinator.create(NewPost::new("now")).await.unwrap().id;
        let post = h.coordinator.publish_now(draft).await.unwrap();
        assert_eq!(post.status, PostStatus::Published);

        assert!(matches!(
            h.coordinator.publish_now(draft).await,
            Err(PostflowError::InvalidTransition {
                status: PostStatus::Published,
                ..
            })
        ));
        assert_eq!(h.contents_published(), vec!["now".to_string()]);
    }

    #[tokio::test]
    async fn test_long_post_publishes_as_reply_chain() {
        let h = Harness::new();
        let id = h
            .coordinator
            .create(NewPost::new(numbered_sentences(15)))
            .await
            .unwrap()
            .id;

        let post = h.coordinator.publish_now(id).await.unwrap();
        assert_eq!(post.status, PostStatus::Published);
        assert_eq!(post.platform_id.as_deref(), Some("p1"));

        let calls = h.publisher.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].0.ends_with(" (1/3)"));
        assert!(calls[2].0.ends_with(" (3/3)"));
        let parents: Vec<Option<String>> = calls.into_iter().map(|c| c.2).collect();
        assert_eq!(parents, vec![None, Some("p1".into()), Some("p2".into())]);

        let segments = h.coordinator.segments(id).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2].platform_id, "p3");
    }

    #[tokio::test]
    async fn test_chain_failure_marks_post_failed_with_progress() {
        let h = Harness::with_publisher(FakePublisher::failing_on(2));
        let id = h
            .coordinator
            .create(NewPost::new(numbered_sentences(15)))
            .await
            .unwrap()
            .id;

        let post = h.coordinator.publish_now(id).await.unwrap();
        let detail = "Segment 2 of 3 failed after 1 published: Platform said no";
        assert_eq!(post.status, PostStatus::Failed);
        assert_eq!(post.error_detail.as_deref(), Some(detail));
        assert_eq!(h.post(id).error_detail.as_deref(), Some(detail));

        // The chain stops at the failure.
        assert_eq!(h.publisher.calls().len(), 2);
        assert_eq!(h.coordinator.segments(id).unwrap().len(), 1);
        eventually(|| !h.notifier.events().is_empty()).await;
        assert_eq!(
            h.notifier.events(),
            vec![LifecycleEvent::Failed {
                post_id: id,
                detail: detail.into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_retry_after_failure_clears_error() {
        let h = Harness::with_publisher(FakePublisher::failing_on(1));
        let id = h.coordinator.create(NewPost::new("hello")).await.unwrap().id;

        let failed = h.coordinator.publish_now(id).await.unwrap();
        assert_eq!(failed.status, PostStatus::Failed);
        assert_eq!(failed.error_detail.as_deref(), Some("Platform said no"));

        let rescheduled = h
            .coordinator
            .schedule(id, start_time() + Duration::hours(1))
            .await
            .unwrap();
        assert!(rescheduled.error_detail.is_none());
        assert!(h.post(id).error_detail.is_none());

        h.coordinator.cancel(id).await.unwrap();
        let published = h.coordinator.publish_now(id).await.unwrap();
        assert_eq!(published.status, PostStatus::Published);
        assert!(published.error_detail.is_none());
        assert_eq!(h.coordinator.segments(id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_media_post_publishes_once_with_media() {
        let h = Harness::new();
        let id = h
            .coordinator
            .create(NewPost::new("caption").with_media("/tmp/cat.png"))
            .await
            .unwrap()
            .id;

        h.coordinator.publish_now(id).await.unwrap();
        assert_eq!(
            h.publisher.calls(),
            vec![(
                "caption".to_string(),
                Some(PathBuf::from("/tmp/cat.png")),
                None
            )]
        );
    }

    #[tokio::test]
    async fn test_delete_cancels_job_and_refuses_published() {
        let h = Harness::new();
        let scheduled = h
            .coordinator
            .create(NewPost::new("later").due_at(start_time() + Duration::hours(1)))
            .await
            .unwrap()
            .id;

        h.coordinator.delete(scheduled).await.unwrap();
        assert!(!h.coordinator.engine().is_live(scheduled));
        assert!(matches!(
            h.coordinator.get(scheduled),
            Err(PostflowError::PostNotFound(_))
        ));

        let published = h.coordinator.create(NewPost::new("done")).await.unwrap().id;
        h.coordinator.publish_now(published).await.unwrap();
        assert!(matches!(
            h.coordinator.delete(published).await,
            Err(PostflowError::InvalidTransition { action: "delete", .. })
        ));
        assert_ok!(h.coordinator.get(published));
    }

    #[tokio::test]
    async fn test_edit_only_while_draft_or_failed() {
        let h = Harness::new();
        let id = h.coordinator.create(NewPost::new("first")).await.unwrap().id;

        let edited = h.coordinator.edit(id, "second".into()).await.unwrap();
        assert_eq!(edited.content, "second");
        assert_eq!(h.post(id).content, "second");

        h.coordinator
            .schedule(id, start_time() + Duration::hours(1))
            .await
            .unwrap();
        assert!(matches!(
            h.coordinator.edit(id, "third".into()).await,
            Err(PostflowError::InvalidTransition { action: "edit", .. })
        ));

        h.coordinator.cancel(id).await.unwrap();
        assert!(matches!(
            h.coordinator.edit(id, "  ".into()).await,
            Err(PostflowError::Validation(_))
        ));
        assert_eq!(h.post(id).content, "second");
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_roll_back() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let coordinator = Coordinator::start(
            store.clone(),
            Arc::new(ManualClock::new(start_time())),
            Arc::new(FakePublisher::default()),
            Arc::new(FailingNotifier),
            LifecycleSettings::default(),
        );

        let id = coordinator.create(NewPost::new("hello")).await.unwrap().id;
        let post = coordinator.publish_now(id).await.unwrap();
        assert_eq!(post.status, PostStatus::Published);
        assert_eq!(
            store.get_post(id).unwrap().unwrap().status,
            PostStatus::Published
        );
    }

    #[tokio::test]
    async fn test_stale_fires_are_dropped() {
        let h = Harness::new();
        let first_due = start_time() + Duration::hours(1);
        let id = h
            .coordinator
            .create(NewPost::new("hello").due_at(first_due))
            .await
            .unwrap()
            .id;
        let old_handle = h.coordinator.engine().handle_of(id).unwrap();

        // A fire from the replaced job must not publish.
        h.coordinator
            .reschedule(id, start_time() + Duration::hours(2))
            .await
            .unwrap();
        h.coordinator
            .handle_fire(FiredJob {
                post_id: id,
                fire_at: first_due,
                handle: old_handle,
            })
            .await;
        assert_eq!(h.post(id).status, PostStatus::Scheduled);

        // Nor may one that arrives after a cancel.
        h.coordinator.cancel(id).await.unwrap();
        h.coordinator
            .handle_fire(FiredJob {
                post_id: id,
                fire_at: first_due,
                handle: old_handle,
            })
            .await;
        assert_eq!(h.post(id).status, PostStatus::Draft);

        // Or one for a post that is gone.
        h.coordinator
            .handle_fire(FiredJob {
                post_id: 404,
                fire_at: first_due,
                handle: old_handle,
            })
            .await;

        assert!(h.publisher.calls().is_empty());
        assert!(h.notifier.events().is_empty());
    }

    #[tokio::test]
    async fn test_rehydrate_publishes_overdue_in_order_and_is_idempotent() {
        let h = Harness::new();
        let now = start_time();
        let second = h.persisted_scheduled("second overdue", Some(now - Duration::minutes(5)));
        let first = h.persisted_scheduled("first overdue", Some(now - Duration::minutes(10)));
        let later = h.persisted_scheduled("later", Some(now + Duration::hours(2)));
        let soon = h.persisted_scheduled("soon", Some(now + Duration::hours(1)));

        let report = h.coordinator.rehydrate().await.unwrap();
        assert_eq!(
            report,
            RehydrationReport {
                published: 2,
                failed: 0,
                registered: 2,
                repaired: 0,
            }
        );
        assert_eq!(
            h.contents_published(),
            vec!["first overdue".to_string(), "second overdue".to_string()]
        );
        assert_eq!(h.post(first).status, PostStatus::Published);
        assert_eq!(h.post(second).status, PostStatus::Published);
        assert!(h.coordinator.engine().is_live(later));
        assert!(h.coordinator.engine().is_live(soon));

        let again = h.coordinator.rehydrate().await.unwrap();
        assert_eq!(again.published, 0);
        assert_eq!(again.registered, 2);
        assert_eq!(h.coordinator.engine().live_count(), 2);
        assert_eq!(h.publisher.calls().len(), 2);

        h.clock.advance(Duration::hours(2));
        eventually(|| h.post(later).status == PostStatus::Published).await;
        eventually(|| h.post(soon).status == PostStatus::Published).await;
        assert_eq!(h.publisher.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_rehydrate_missed_wakeup_reaches_terminal_state() {
        let h = Harness::with_publisher(FakePublisher::failing_on(1));
        let id = h.persisted_scheduled("missed", Some(start_time() - Duration::minutes(5)));

        let report = h.coordinator.rehydrate().await.unwrap();
        assert_eq!(report.failed, 1);

        let post = h.post(id);
        assert_eq!(post.status, PostStatus::Failed);
        assert_eq!(post.error_detail.as_deref(), Some("Platform said no"));
        assert!(!h.coordinator.engine().is_live(id));
    }

    #[tokio::test]
    async fn test_rehydrate_repairs_scheduled_row_without_due() {
        let h = Harness::new();
        let id = h.persisted_scheduled("orphan", None);

        let report = h.coordinator.rehydrate().await.unwrap();
        assert_eq!(report.repaired, 1);

        let post = h.post(id);
        assert_eq!(post.status, PostStatus::Draft);
        assert!(post.error_detail.is_some());
        assert_eq!(h.coordinator.engine().live_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drops_jobs_but_keeps_rows() {
        let h = Harness::new();
        let id = h
            .coordinator
            .create(NewPost::new("hello").due_at(start_time() + Duration::hours(1)))
            .await
            .unwrap()
            .id;

        h.coordinator.shutdown();
        assert_eq!(h.coordinator.engine().live_count(), 0);
        assert_eq!(h.post(id).status, PostStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_slow_notifier_does_not_hold_up_publishing() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let coordinator = Coordinator::start(
            store.clone(),
            Arc::new(ManualClock::new(start_time())),
            Arc::new(FakePublisher::default()),
            Arc::new(StalledNotifier),
            LifecycleSettings::default(),
        );
        let overdue = Post {
            id: 0,
            content: "overdue".into(),
            media_ref: None,
            status: PostStatus::Scheduled,
            scheduled_at: Some(start_time() - Duration::minutes(1)),
            published_at: None,
            error_detail: None,
            platform_id: None,
            created_by_ai: false,
            ai_prompt: None,
            created_at: start_time(),
            updated_at: start_time(),
        };
        store.insert_post(&overdue).unwrap();
        store.insert_post(&overdue).unwrap();
        let draft = coordinator.create(NewPost::new("now")).await.unwrap().id;

        let report = tokio::time::timeout(StdDuration::from_secs(1), coordinator.rehydrate())
            .await
            .expect("rehydration waited on the notifier")
            .unwrap();
        assert_eq!(report.published, 2);

        let post = tokio::time::timeout(StdDuration::from_secs(1), coordinator.publish_now(draft))
            .await
            .expect("publish waited on the notifier")
            .unwrap();
        assert_eq!(post.status, PostStatus::Published);
    }

    #[tokio::test]
    async fn test_reschedule_after_fire_is_not_scheduled() {
        let h = Harness::new();
        let due = start_time() + Duration::minutes(30);
        let id = h
            .coordinator
            .create(NewPost::new("hello").due_at(due))
            .await
            .unwrap()
            .id;

        h.clock.advance(Duration::minutes(30));
        eventually(|| h.post(id).status == PostStatus::Published).await;

        let late = h
            .coordinator
            .reschedule(id, h.clock.now() + Duration::hours(1))
            .await;
        assert!(matches!(late, Err(PostflowError::NotScheduled(n)) if n == id));
        assert_eq!(h.coordinator.engine().live_count(), 0);
        assert_eq!(h.publisher.calls().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rehydrate_and_reschedule_keep_one_job() {
        let h = Harness::new();
        let id = h
            .coordinator
            .create(NewPost::new("hello").due_at(start_time() + Duration::hours(1)))
            .await
            .unwrap()
            .id;
        let later = start_time() + Duration::hours(2);

        let (rehydrated, rescheduled) = tokio::join!(
            h.coordinator.rehydrate(),
            h.coordinator.reschedule(id, later)
        );
        assert_ok!(rehydrated);
        assert_ok!(rescheduled);

        assert_eq!(h.coordinator.engine().live_count(), 1);
        assert_eq!(h.coordinator.engine().fire_at(id), Some(later));
        assert_eq!(h.post(id).scheduled_at, Some(later));

        h.clock.advance(Duration::hours(3));
        eventually(|| h.post(id).status == PostStatus::Published).await;
        settle().await;
        assert_eq!(h.publisher.calls().len(), 1);
        assert_eq!(h.coordinator.engine().live_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_rehydrate_and_reschedule_of_overdue_post() {
        let h = Harness::new();
        let id = h.persisted_scheduled("overdue", Some(start_time() - Duration::minutes(5)));
        let later = start_time() + Duration::hours(1);

        let (rehydrated, rescheduled) = tokio::join!(
            h.coordinator.rehydrate(),
            h.coordinator.reschedule(id, later)
        );
        assert_ok!(rehydrated);

        match rescheduled {
            // The overdue publish won the race.
            Err(PostflowError::NotScheduled(_)) => {
                assert_eq!(h.post(id).status, PostStatus::Published);
                assert_eq!(h.coordinator.engine().live_count(), 0);
            }
            Ok(_) => {
                assert_eq!(h.post(id).status, PostStatus::Scheduled);
                assert_eq!(h.coordinator.engine().live_count(), 1);
                assert_eq!(h.coordinator.engine().fire_at(id), Some(later));
                h.clock.advance(Duration::hours(1));
                eventually(|| h.post(id).status == PostStatus::Published).await;
            }
            Err(e) => panic!("unexpected reschedule error: {}", e),
        }

        settle().await;
        assert_eq!(h.publisher.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_settled_posts_release_their_locks() {
        let h = Harness::new();
        let draft = h.coordinator.create(NewPost::new("draft")).await.unwrap().id;
        h.coordinator.edit(draft, "edited".into()).await.unwrap();
        h.coordinator.publish_now(draft).await.unwrap();

        let cancelled = h
            .coordinator
            .create(NewPost::new("later").due_at(start_time() + Duration::hours(1)))
            .await
            .unwrap()
            .id;
        h.coordinator.cancel(cancelled).await.unwrap();

        let fired = h
            .coordinator
            .create(NewPost::new("soon").due_at(start_time() + Duration::minutes(5)))
            .await
            .unwrap()
            .id;
        h.clock.advance(Duration::minutes(5));
        eventually(|| h.post(fired).status == PostStatus::Published).await;
        eventually(|| h.coordinator.tracked_locks() == 0).await;

        h.coordinator.delete(cancelled).await.unwrap();
        assert_eq!(h.coordinator.tracked_locks(), 0);
    }
}

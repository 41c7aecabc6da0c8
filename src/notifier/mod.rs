//! Fire-and-forget outcome notifications.

pub mod telegram;

pub use telegram::TelegramNotifier;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::app::Result;

/// Terminal outcome of a publish attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Published {
        post_id: i64,
        platform_id: String,
        segments: usize,
    },
    Failed {
        post_id: i64,
        detail: String,
    },
}

impl LifecycleEvent {
    pub fn post_id(&self) -> i64 {
        match self {
            LifecycleEvent::Published { post_id, .. } | LifecycleEvent::Failed { post_id, .. } => {
                *post_id
            }
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Published {
                post_id,
                platform_id,
                segments,
            } if *segments > 1 => write!(
                f,
                "Post #{} published as a {}-part thread (id {})",
                post_id, segments, platform_id
            ),
            LifecycleEvent::Published {
                post_id,
                platform_id,
                ..
            } => write!(f, "Post #{} published (id {})", post_id, platform_id),
            LifecycleEvent::Failed { post_id, detail } => {
                write!(f, "Post #{} failed to publish: {}", post_id, detail)
            }
        }
    }
}

/// Receives lifecycle outcomes. Errors are logged by the caller and never
/// undo the state change that produced the event.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &LifecycleEvent) -> Result<()>;
}

/// Writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &LifecycleEvent) -> Result<()> {
        match event {
            LifecycleEvent::Published { .. } => tracing::info!("{}", event),
            LifecycleEvent::Failed { .. } => tracing::warn!("{}", event),
        }
        Ok(())
    }
}

/// Delivers each event to every inner notifier concurrently.
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, event: &LifecycleEvent) -> Result<()> {
        let results = join_all(self.targets.iter().map(|t| t.notify(event))).await;

        // Report the first failure after every target has had its turn.
        results.into_iter().collect::<Result<Vec<()>>>().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::app::PostflowError;

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Notifier for Counting {
        async fn notify(&self, _event: &LifecycleEvent) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Notifier for Broken {
        async fn notify(&self, _event: &LifecycleEvent) -> Result<()> {
            Err(PostflowError::Other("chat unreachable".into()))
        }
    }

    #[test]
    fn test_event_display() {
        let single = LifecycleEvent::Published {
            post_id: 4,
            platform_id: "99".into(),
            segments: 1,
        };
        assert_eq!(single.to_string(), "Post #4 published (id 99)");

        let thread = LifecycleEvent::Published {
            post_id: 4,
            platform_id: "99".into(),
            segments: 3,
        };
        assert!(thread.to_string().contains("3-part thread"));

        let failed = LifecycleEvent::Failed {
            post_id: 5,
            detail: "rate limited".into(),
        };
        assert_eq!(failed.post_id(), 5);
        assert!(failed.to_string().ends_with("rate limited"));
    }

    #[tokio::test]
    async fn test_fanout_reaches_all_targets_despite_failure() {
        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let fanout = FanoutNotifier::new(vec![
            Arc::new(Broken) as Arc<dyn Notifier>,
            counter.clone() as Arc<dyn Notifier>,
            Arc::new(LogNotifier) as Arc<dyn Notifier>,
        ]);

        let event = LifecycleEvent::Failed {
            post_id: 1,
            detail: "x".into(),
        };
        tokio_test::assert_err!(fanout.notify(&event).await);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let event = LifecycleEvent::Published {
            post_id: 1,
            platform_id: "1".into(),
            segments: 1,
        };
        tokio_test::assert_ok!(LogNotifier.notify(&event).await);
    }
}

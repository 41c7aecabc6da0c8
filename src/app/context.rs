use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{PostflowError, Result};
use crate::config::Config;
use crate::generator::{ContentGenerator, DisabledGenerator, OpenAiGenerator};
use crate::lifecycle::Coordinator;
use crate::lock::SchedulerLock;
use crate::notifier::{FanoutNotifier, LogNotifier, Notifier, TelegramNotifier};
use crate::publisher::{DisabledPublisher, Publisher, XPublisher};
use crate::scheduler::{Clock, SystemClock};
use crate::store::sqlite::SqliteStore;
use crate::store::Store;

/// Everything a command needs, wired from configuration.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub coordinator: Arc<Coordinator>,
    pub generator: Arc<dyn ContentGenerator>,
}

impl AppContext {
    /// Open the configured database and start the coordinator. Must run inside
    /// a tokio runtime.
    pub fn new(config: Config) -> Result<Self> {
        let db_path = config
            .database_path()
            .map_err(|e| PostflowError::Config(e.to_string()))?;
        let store = Arc::new(SqliteStore::new(&db_path)?);
        tracing::debug!("Using database {}", db_path.display());

        let publisher = Self::build_publisher(&config)?;
        let notifier = Self::build_notifier(&config)?;
        let generator = Self::build_generator(&config)?;

        Ok(Self::assemble(config, store, Arc::new(SystemClock), publisher, notifier, generator))
    }

    /// In-memory store with publishing and generation disabled.
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with_clock(Arc::new(SystemClock))
    }

    pub fn in_memory_with_clock(clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Ok(Self::assemble(
            Config::default(),
            store,
            clock,
            Arc::new(DisabledPublisher),
            Arc::new(LogNotifier),
            Arc::new(DisabledGenerator),
        ))
    }

    fn assemble(
        config: Config,
        store: Arc<SqliteStore>,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn Publisher>,
        notifier: Arc<dyn Notifier>,
        generator: Arc<dyn ContentGenerator>,
    ) -> Self {
        let coordinator = Coordinator::start(
            store.clone() as Arc<dyn Store>,
            clock,
            publisher,
            notifier,
            config.lifecycle_settings(),
        );

        Self {
            config,
            store,
            coordinator,
            generator,
        }
    }

    fn build_publisher(config: &Config) -> Result<Arc<dyn Publisher>> {
        match &config.publisher.bearer_token {
            Some(token) => Ok(Arc::new(XPublisher::new(&config.publisher, token.clone())?)),
            None => {
                tracing::warn!("No publisher credentials configured; publishing will fail");
                Ok(Arc::new(DisabledPublisher))
            }
        }
    }

    fn build_generator(config: &Config) -> Result<Arc<dyn ContentGenerator>> {
        match &config.generator.api_key {
            Some(key) => Ok(Arc::new(OpenAiGenerator::new(&config.generator, key.clone())?)),
            None => Ok(Arc::new(DisabledGenerator)),
        }
    }

    fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
        let mut targets: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
        if let (Some(token), Some(chat)) = (
            &config.notifier.telegram_bot_token,
            &config.notifier.telegram_chat_id,
        ) {
            targets.push(Arc::new(TelegramNotifier::new(token, chat.clone())?));
        }
        Ok(Arc::new(FanoutNotifier::new(targets)))
    }

    /// Lock file guarding publishing for the configured database.
    pub fn lock_path(&self) -> Result<PathBuf> {
        self.config
            .database_path()
            .map(|db| SchedulerLock::path_for(&db))
            .map_err(|e| PostflowError::Config(e.to_string()))
    }

    pub fn operator(&self) -> i64 {
        self.config.operator.id
    }

    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewPost;

    #[tokio::test]
    async fn test_in_memory_context_wires_coordinator() {
        let ctx = AppContext::in_memory().unwrap();
        let post = ctx.coordinator.create(NewPost::new("hello")).await.unwrap();
        assert_eq!(ctx.store.get_post(post.id).unwrap().unwrap().content, "hello");

        // Publishing without credentials fails cleanly into FAILED.
        let failed = ctx.coordinator.publish_now(post.id).await.unwrap();
        assert_eq!(failed.status, crate::domain::PostStatus::Failed);
        assert!(failed.error_detail.unwrap().contains("not configured"));
        ctx.shutdown();
    }

    #[tokio::test]
    async fn test_new_uses_configured_database_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = Some(dir.path().join("posts.db"));

        let ctx = AppContext::new(config).unwrap();
        assert!(dir.path().join("posts.db").exists());
        assert_eq!(ctx.lock_path().unwrap(), dir.path().join("posts.db.lock"));
        assert_eq!(ctx.operator(), 0);
    }
}

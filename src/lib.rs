//! # PostFlow
//!
//! A single-operator post lifecycle and scheduling engine for short-form
//! social posts.
//!
//! ## Architecture
//!
//! ```text
//! CLI / console → Coordinator → Store
//!                      │  ▲
//!                      ▼  │ fired jobs
//!              SchedulingEngine
//!                      │
//!          Splitter → Publisher → Notifier
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! # Draft a post and schedule it two hours out
//! postflow post new "Shipping the new release today."
//! postflow post schedule 1 +2h
//!
//! # Run the scheduler; commands can also be typed on its console
//! postflow run
//!
//! # Generate a draft from a topic preset
//! postflow topic add "Rust tooling"
//! postflow generate --topic 1 --save
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together the store,
/// coordinator, publisher, generator and notifiers from configuration.
pub mod app;

/// Command-line interface using clap.
///
/// - `post new|edit|show|list|scheduled|schedule|reschedule|cancel|publish|delete|stats`
/// - `topic add|list|remove|clear`
/// - `generate` - AI drafts from a prompt, a topic preset, or an existing post
/// - `run`, `stop`, `status` - the scheduler process
pub mod cli;

/// Configuration loaded from `~/.config/postflow/config.toml` and the environment.
pub mod config;

/// Foreground scheduler process with PID file and stdin console.
pub mod daemon;

/// Core domain models.
///
/// - [`Post`](domain::Post) and [`PostStatus`](domain::PostStatus)
/// - [`TopicPreset`](domain::TopicPreset)
/// - [`PublishedSegment`](domain::PublishedSegment)
pub mod domain;

/// AI content generation behind the [`ContentGenerator`](generator::ContentGenerator) trait.
pub mod generator;

/// The post state machine and rehydration.
pub mod lifecycle;

/// Publish outcome notifications.
pub mod notifier;

/// Publishing platform adapters.
///
/// - [`Publisher`](publisher::Publisher): Async trait for publishing
/// - [`XPublisher`](publisher::XPublisher): X API v2 over reqwest
pub mod publisher;

/// Cross-process lock that decides which process may publish due posts.
pub mod lock;

/// Timer-driven one-shot jobs with an injectable clock.
pub mod scheduler;

/// Deterministic thread splitting.
pub mod splitter;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): Trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{PostflowError, Result};
use crate::domain::topic::{normalize_label, MAX_TOPICS_PER_OWNER};
use crate::domain::{Page, Post, PostStats, PostStatus, PublishedSegment, TopicPreset};
use crate::store::Store;

const POST_COLUMNS: &str = "id, content, media_ref, status, scheduled_at, published_at, error_detail,
     platform_id, created_by_ai, ai_prompt, created_at, updated_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        migrations
            .to_latest(&mut conn)
            .map_err(|e| PostflowError::Other(format!("Database migration failed: {}", e)))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            PostflowError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
        let status = row
            .get::<_, String>(3)?
            .parse::<PostStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?;
        let time = |idx: usize| -> rusqlite::Result<Option<DateTime<Utc>>> {
            Ok(row
                .get::<_, Option<String>>(idx)?
                .and_then(|s| Self::parse_datetime(&s)))
        };

        Ok(Post {
            id: row.get(0)?,
            content: row.get(1)?,
            media_ref: row.get::<_, Option<String>>(2)?.map(PathBuf::from),
            status,
            scheduled_at: time(4)?,
            published_at: time(5)?,
            error_detail: row.get(6)?,
            platform_id: row.get(7)?,
            created_by_ai: row.get::<_, i32>(8)? != 0,
            ai_prompt: row.get(9)?,
            created_at: time(10)?.unwrap_or_else(Utc::now),
            updated_at: time(11)?.unwrap_or_else(Utc::now),
        })
    }

    fn topic_from_row(row: &Row<'_>) -> rusqlite::Result<TopicPreset> {
        Ok(TopicPreset {
            id: row.get(0)?,
            owner: row.get(1)?,
            label: row.get(2)?,
            created_at: row
                .get::<_, String>(3)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
        })
    }

    fn query_posts(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Post>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let posts = stmt
            .query_map(params, Self::post_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(posts)
    }
}

/// Timestamps are stored with millisecond precision so that lexical order of
/// the text column matches chronological order.
pub fn encode_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Round an instant down to the precision the store keeps.
pub fn storage_precision(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(3)
}

impl Store for SqliteStore {
    fn insert_post(&self, post: &Post) -> Result<i64> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO posts (content, media_ref, status, scheduled_at, published_at, error_detail,
                                platform_id, created_by_ai, ai_prompt, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                post.content,
                post.media_ref.as_ref().map(|p| p.to_string_lossy().into_owned()),
                post.status.as_str(),
                post.scheduled_at.as_ref().map(encode_time),
                post.published_at.as_ref().map(encode_time),
                post.error_detail,
                post.platform_id,
                post.created_by_ai as i32,
                post.ai_prompt,
                encode_time(&post.created_at),
                encode_time(&post.updated_at),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    fn get_post(&self, id: i64) -> Result<Option<Post>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS),
                params![id],
                Self::post_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn update_post(&self, post: &Post) -> Result<()> {
        let conn = self.conn()?;

        let changed = conn.execute(
            "UPDATE posts SET content = ?1, media_ref = ?2, status = ?3, scheduled_at = ?4,
                    published_at = ?5, error_detail = ?6, platform_id = ?7, updated_at = ?8
             WHERE id = ?9",
            params![
                post.content,
                post.media_ref.as_ref().map(|p| p.to_string_lossy().into_owned()),
                post.status.as_str(),
                post.scheduled_at.as_ref().map(encode_time),
                post.published_at.as_ref().map(encode_time),
                post.error_detail,
                post.platform_id,
                encode_time(&post.updated_at),
                post.id,
            ],
        )?;

        if changed == 0 {
            return Err(PostflowError::PostNotFound(post.id));
        }
        Ok(())
    }

    fn delete_post(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn scheduled_posts(&self) -> Result<Vec<Post>> {
        self.query_posts(
            &format!(
                "SELECT {} FROM posts WHERE status = 'scheduled'
                 ORDER BY scheduled_at ASC, id ASC",
                POST_COLUMNS
            ),
            [],
        )
    }

    fn posts_by_status(&self, status: PostStatus, page: Page) -> Result<Vec<Post>> {
        let order_column = match status {
            PostStatus::Scheduled => "scheduled_at",
            PostStatus::Published => "published_at",
            PostStatus::Draft | PostStatus::Failed => "updated_at",
        };

        self.query_posts(
            &format!(
                "SELECT {} FROM posts WHERE status = ?1
                 ORDER BY {} DESC, id DESC LIMIT ?2 OFFSET ?3",
                POST_COLUMNS, order_column
            ),
            params![status.as_str(), page.limit as i64, page.offset as i64],
        )
    }

    fn recent_posts(&self, page: Page) -> Result<Vec<Post>> {
        self.query_posts(
            &format!(
                "SELECT {} FROM posts ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
                POST_COLUMNS
            ),
            params![page.limit as i64, page.offset as i64],
        )
    }

    fn post_stats(&self) -> Result<PostStats> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM posts GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut stats = PostStats::default();
        for (status, count) in rows {
            match status.parse::<PostStatus>() {
                Ok(PostStatus::Draft) => stats.draft = count,
                Ok(PostStatus::Scheduled) => stats.scheduled = count,
                Ok(PostStatus::Published) => stats.published = count,
                Ok(PostStatus::Failed) => stats.failed = count,
                Err(e) => tracing::warn!("Ignoring posts with {}", e),
            }
        }

        Ok(stats)
    }

    fn record_segment(&self, post_id: i64, segment: &PublishedSegment) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO post_segments (post_id, position, content, platform_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(post_id, position) DO UPDATE SET content = ?3, platform_id = ?4",
            params![
                post_id,
                segment.position as i64,
                segment.content,
                segment.platform_id
            ],
        )?;

        Ok(())
    }

    fn segments(&self, post_id: i64) -> Result<Vec<PublishedSegment>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT position, content, platform_id FROM post_segments
             WHERE post_id = ?1 ORDER BY position",
        )?;

        let segments = stmt
            .query_map(params![post_id], |row| {
                Ok(PublishedSegment {
                    position: row.get::<_, i64>(0)? as usize,
                    content: row.get(1)?,
                    platform_id: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(segments)
    }

    fn clear_segments(&self, post_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM post_segments WHERE post_id = ?1",
            params![post_id],
        )?;
        Ok(())
    }

    fn add_topic(
        &self,
        owner: i64,
        label: &str,
        created_at: DateTime<Utc>,
    ) -> Result<TopicPreset> {
        let label = normalize_label(label).map_err(PostflowError::Validation)?;
        let mut conn = self.conn()?;

        let tx = conn.transaction()?;

        let existing: Vec<String> = {
            let mut stmt = tx.prepare("SELECT label FROM topics WHERE owner = ?1")?;
            let labels = stmt
                .query_map(params![owner], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            labels
        };

        if existing.len() >= MAX_TOPICS_PER_OWNER {
            return Err(PostflowError::validation(format!(
                "Maximum of {} topics reached. Delete one to add more.",
                MAX_TOPICS_PER_OWNER
            )));
        }

        let folded = label.to_lowercase();
        if existing.iter().any(|l| l.to_lowercase() == folded) {
            return Err(PostflowError::validation(format!(
                "Topic '{}' already exists",
                label
            )));
        }

        let created_at = storage_precision(created_at);
        tx.execute(
            "INSERT INTO topics (owner, label, created_at) VALUES (?1, ?2, ?3)",
            params![owner, label, encode_time(&created_at)],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::info!("Created topic '{}' for owner {}", label, owner);
        Ok(TopicPreset {
            id,
            owner,
            label: label.to_string(),
            created_at,
        })
    }

    fn topics(&self, owner: i64) -> Result<Vec<TopicPreset>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, owner, label, created_at FROM topics
             WHERE owner = ?1 ORDER BY label COLLATE NOCASE, id",
        )?;

        let topics = stmt
            .query_map(params![owner], Self::topic_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(topics)
    }

    fn get_topic(&self, owner: i64, id: i64) -> Result<Option<TopicPreset>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                "SELECT id, owner, label, created_at FROM topics WHERE id = ?1 AND owner = ?2",
                params![id, owner],
                Self::topic_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn delete_topic(&self, owner: i64, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM topics WHERE id = ?1 AND owner = ?2",
            params![id, owner],
        )?;
        Ok(deleted > 0)
    }

    fn delete_all_topics(&self, owner: i64) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM topics WHERE owner = ?1", params![owner])?;
        tracing::info!("Deleted {} topics for owner {}", deleted, owner);
        Ok(deleted)
    }

    fn topic_count(&self, owner: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM topics WHERE owner = ?1",
            params![owner],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

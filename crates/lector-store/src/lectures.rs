use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use lector_core::errors::PersistenceError;
use lector_core::ids::LectureId;
use lector_core::lecture::{to_stripped_value, HydratedSlide, StylePreferences};
use lector_core::store::LectureStore;

use crate::database::Database;
use crate::error::StoreError;

/// SQLite-backed persistence gateway for lecture documents.
#[derive(Clone)]
pub struct SqliteLectureStore {
    db: Database,
}

impl SqliteLectureStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, permitted_users, preferences))]
    pub fn create_sync(
        &self,
        topic: &str,
        permitted_users: &[String],
        preferences: &StylePreferences,
    ) -> Result<LectureId, StoreError> {
        let id = LectureId::new();
        let now = Utc::now().to_rfc3339();
        let users = serde_json::to_string(permitted_users)?;
        let prefs = serde_json::to_string(&to_stripped_value(preferences)?)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO lectures (id, topic, preferences, permitted_users, version, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
                rusqlite::params![id.as_str(), topic, prefs, users, now],
            )?;
            Ok(())
        })?;
        Ok(id)
    }

    /// Assemble the raw stored document. Columns that fail to parse are
    /// passed through as strings so shape validation can reject them.
    #[instrument(skip(self, id), fields(lecture_id = %id))]
    pub fn get_sync(&self, id: &LectureId) -> Result<Value, StoreError> {
        self.db.with_conn(|conn| {
            let head: Option<(String, String, String, i64)> = conn
                .query_row(
                    "SELECT topic, preferences, permitted_users, version FROM lectures WHERE id = ?1",
                    [id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            let Some((topic, preferences, permitted_users, version)) = head else {
                return Err(StoreError::NotFound(format!("lecture {id}")));
            };

            let mut stmt =
                conn.prepare("SELECT body FROM slides WHERE lecture_id = ?1 ORDER BY position")?;
            let slides = stmt
                .query_map([id.as_str()], |row| row.get::<_, String>(0))?
                .map(|body| body.map(|b| parse_or_raw(&b)))
                .collect::<Result<Vec<_>, _>>()?;

            Ok(json!({
                "topic": topic,
                "preferences": parse_or_raw(&preferences),
                "permitted_users": parse_or_raw(&permitted_users),
                "version": version,
                "slides": slides,
            }))
        })
    }

    #[instrument(skip(self, id, slides), fields(lecture_id = %id, count = slides.len()))]
    pub fn replace_suffix_sync(
        &self,
        id: &LectureId,
        offset: usize,
        slides: &[HydratedSlide],
    ) -> Result<u64, StoreError> {
        let bodies = slides
            .iter()
            .map(|s| to_stripped_value(s).and_then(|v| serde_json::to_string(&v)))
            .collect::<Result<Vec<_>, _>>()?;

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let exists: Option<i64> = tx
                .query_row("SELECT version FROM lectures WHERE id = ?1", [id.as_str()], |r| r.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::NotFound(format!("lecture {id}")));
            }

            let len: i64 = tx.query_row(
                "SELECT COUNT(*) FROM slides WHERE lecture_id = ?1",
                [id.as_str()],
                |r| r.get(0),
            )?;
            let len = len as usize;
            if offset > len {
                return Err(StoreError::InvalidOffset { offset, len });
            }

            let dropped = tx.execute(
                "DELETE FROM slides WHERE lecture_id = ?1 AND position >= ?2",
                rusqlite::params![id.as_str(), offset as i64],
            )?;
            {
                let mut insert = tx.prepare(
                    "INSERT INTO slides (lecture_id, position, body) VALUES (?1, ?2, ?3)",
                )?;
                for (i, body) in bodies.iter().enumerate() {
                    insert.execute(rusqlite::params![id.as_str(), (offset + i) as i64, body])?;
                }
            }

            let version: i64 = tx.query_row(
                "UPDATE lectures SET version = version + 1, updated_at = ?2 WHERE id = ?1 RETURNING version",
                rusqlite::params![id.as_str(), Utc::now().to_rfc3339()],
                |r| r.get(0),
            )?;
            tx.commit()?;

            debug!(dropped, inserted = bodies.len(), version, "suffix replaced");
            Ok(version as u64)
        })
    }
}

fn parse_or_raw(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl LectureStore for SqliteLectureStore {
    async fn create(
        &self,
        topic: &str,
        permitted_users: &[String],
        preferences: &StylePreferences,
    ) -> Result<LectureId, PersistenceError> {
        Ok(self.create_sync(topic, permitted_users, preferences)?)
    }

    async fn get(&self, id: &LectureId) -> Result<Value, PersistenceError> {
        Ok(self.get_sync(id)?)
    }

    async fn replace_suffix(
        &self,
        id: &LectureId,
        offset: usize,
        slides: &[HydratedSlide],
    ) -> Result<u64, PersistenceError> {
        Ok(self.replace_suffix_sync(id, offset, slides)?)
    }
}

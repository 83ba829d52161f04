//! Content-addressed storage for inline asset payloads (`data:` URLs).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use rusqlite::OptionalExtension;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use lector_core::adapters::AssetStore;
use lector_core::errors::PersistenceError;

use crate::database::Database;
use crate::error::StoreError;

pub const ASSET_SCHEME: &str = "asset://";

/// A decoded `data:` URL.
#[derive(Debug, PartialEq, Eq)]
pub struct InlinePayload {
    pub mime: String,
    pub data: Vec<u8>,
}

impl InlinePayload {
    pub fn parse(reference: &str) -> Result<Self, StoreError> {
        let rest = reference
            .strip_prefix("data:")
            .ok_or_else(|| StoreError::InvalidPayload("not a data: URL".into()))?;
        let (meta, body) = rest
            .split_once(',')
            .ok_or_else(|| StoreError::InvalidPayload("data: URL has no payload".into()))?;

        let (mime, is_base64) = match meta.strip_suffix(";base64") {
            Some(mime) => (mime, true),
            None => (meta, false),
        };
        let mime = if mime.is_empty() {
            "application/octet-stream"
        } else {
            mime
        };

        let data = if is_base64 {
            STANDARD
                .decode(body)
                .map_err(|e| StoreError::InvalidPayload(format!("base64: {e}")))?
        } else {
            body.as_bytes().to_vec()
        };

        Ok(Self {
            mime: mime.to_string(),
            data,
        })
    }

    /// Hex SHA-256 of the payload bytes.
    pub fn digest(&self) -> String {
        Sha256::digest(&self.data)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

#[derive(Clone)]
pub struct SqliteAssetStore {
    db: Database,
}

impl SqliteAssetStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a `data:` URL and return its durable `asset://` reference.
    /// Identical payloads share one row.
    #[instrument(skip_all, fields(len = inline.len()))]
    pub fn persist_sync(&self, inline: &str) -> Result<String, StoreError> {
        let payload = InlinePayload::parse(inline)?;
        let id = payload.digest();
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO assets (id, mime, data, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, payload.mime, payload.data, Utc::now().to_rfc3339()],
            )?;
            debug!(asset_id = %id, deduplicated = inserted == 0, "asset persisted");
            Ok(())
        })?;
        Ok(format!("{ASSET_SCHEME}{id}"))
    }

    /// Load an asset by id (the part after `asset://`).
    pub fn load(&self, id: &str) -> Result<InlinePayload, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT mime, data FROM assets WHERE id = ?1", [id], |row| {
                Ok(InlinePayload {
                    mime: row.get(0)?,
                    data: row.get(1)?,
                })
            })
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("asset {id}")))
        })
    }
}

#[async_trait]
impl AssetStore for SqliteAssetStore {
    async fn persist(&self, inline_payload: &str) -> Result<String, PersistenceError> {
        Ok(self.persist_sync(inline_payload)?)
    }
}

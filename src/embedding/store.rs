//! Profile, caption and embedding storage using SQLite
//!
//! Embeddings are stored as little-endian f32 BLOBs, one row per subject: the
//! row *is* the active embedding, so writing a new one replaces the old one.
//! `updated_at` (microseconds) changes on every replacement and is what map
//! signatures key on.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::generator::{GeneratedEmbedding, FALLBACK_MODEL_VERSION};
use crate::core::schema::{CaptioningStatus, SubjectKind};
use crate::core::signal::annotate_caption;
use crate::enrich::EnrichmentResult;

enum Location {
    File(PathBuf),
    Memory,
}

/// SQLite-backed store; cheap to open additional sessions from
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    location: Location,
}

/// The single active embedding of a subject
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub subject_id: String,
    pub vector: Vec<f32>,
    pub model_name: String,
    pub model_version: Option<String>,
    pub source_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    /// Produced offline rather than by the embedding service
    pub fn is_fallback(&self) -> bool {
        self.model_version.as_deref() == Some(FALLBACK_MODEL_VERSION)
    }
}

/// Collaborator-supplied profile fields
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectProfile {
    pub subject_id: String,
    pub kind: SubjectKind,
    pub label: Option<String>,
    pub selected_tags: Vec<String>,
    pub description: Option<String>,
    pub captioning_status: Option<CaptioningStatus>,
}

/// Latest enrichment stored for one photo
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCaption {
    pub photo_id: String,
    pub image_path: String,
    pub caption_en: String,
    pub caption_ko: String,
    pub inferred_tags: Vec<String>,
    pub model_name: String,
    pub model_version: Option<String>,
}

impl StoredCaption {
    /// Caption as it feeds the composer
    pub fn annotated(&self) -> String {
        annotate_caption(&self.caption_ko, &self.inferred_tags)
    }
}

/// Store statistics
#[derive(Debug)]
pub struct StoreStats {
    pub subject_count: usize,
    pub caption_count: usize,
    pub embedding_count: usize,
    pub last_embedded: Option<DateTime<Utc>>,
}

impl SqliteStore {
    /// Open or create database at path
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Self::connect_file(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            location: Location::File(db_path.to_path_buf()),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a private in-memory database (for testing)
    ///
    /// Sessions opened from an in-memory store share its connection.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            location: Location::Memory,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Independent session on the same database
    pub fn session(&self) -> Result<Self> {
        match &self.location {
            Location::File(path) => Ok(Self {
                conn: Arc::new(Mutex::new(Self::connect_file(path)?)),
                location: Location::File(path.clone()),
            }),
            Location::Memory => Ok(Self {
                conn: Arc::clone(&self.conn),
                location: Location::Memory,
            }),
        }
    }

    fn connect_file(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(conn)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("store connection mutex poisoned"))
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            -- Profile signals supplied by the outer application
            CREATE TABLE IF NOT EXISTS subjects (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                label TEXT,
                selected_tags TEXT NOT NULL DEFAULT '[]',  -- JSON array
                description TEXT,
                captioning_status TEXT,
                updated_at INTEGER NOT NULL
            );

            -- Latest enrichment per photo
            CREATE TABLE IF NOT EXISTS image_captions (
                photo_id TEXT PRIMARY KEY,
                subject_id TEXT NOT NULL,
                image_path TEXT NOT NULL,
                caption_raw_en TEXT NOT NULL,
                caption_ko TEXT NOT NULL,
                inferred_tags TEXT NOT NULL DEFAULT '[]',  -- JSON array
                model_name TEXT NOT NULL,
                model_version TEXT,
                created_at INTEGER NOT NULL
            );

            -- Active embedding per subject (at most one row each)
            CREATE TABLE IF NOT EXISTS embeddings (
                subject_id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                model_name TEXT NOT NULL,
                model_version TEXT,
                source_hash TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS group_members (
                group_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                PRIMARY KEY (group_id, user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_captions_subject ON image_captions(subject_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_members_user ON group_members(user_id);
            "#,
        )?;

        Ok(())
    }

    /// Insert or update a subject's profile signal fields
    pub fn upsert_subject(
        &self,
        subject_id: &str,
        kind: SubjectKind,
        label: Option<&str>,
        selected_tags: &[String],
        description: Option<&str>,
    ) -> Result<()> {
        let tags_json = serde_json::to_string(selected_tags)?;
        let now = Utc::now().timestamp_micros();

        self.conn()?.execute(
            r#"
            INSERT INTO subjects (id, kind, label, selected_tags, description, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                label = excluded.label,
                selected_tags = excluded.selected_tags,
                description = excluded.description,
                updated_at = excluded.updated_at
            "#,
            params![subject_id, kind.as_str(), label, tags_json, description, now],
        )?;
        Ok(())
    }

    /// Get subject by ID
    pub fn get_subject(&self, subject_id: &str) -> Result<Option<SubjectProfile>> {
        let result = self
            .conn()?
            .query_row(
                "SELECT id, kind, label, selected_tags, description, captioning_status FROM subjects WHERE id = ?1",
                params![subject_id],
                |row| {
                    let kind: String = row.get(1)?;
                    let tags_json: String = row.get(3)?;
                    let status: Option<String> = row.get(5)?;
                    Ok(SubjectProfile {
                        subject_id: row.get(0)?,
                        kind: SubjectKind::parse(&kind).unwrap_or(SubjectKind::User),
                        label: row.get(2)?,
                        selected_tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                        description: row.get(4)?,
                        captioning_status: status.as_deref().and_then(CaptioningStatus::parse),
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    /// All subject IDs of one kind
    pub fn list_subjects(&self, kind: SubjectKind) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM subjects WHERE kind = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![kind.as_str()], |row| row.get(0))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Set the enrichment status flag, creating a bare user row if needed
    pub fn set_captioning_status(&self, subject_id: &str, status: CaptioningStatus) -> Result<()> {
        let now = Utc::now().timestamp_micros();
        self.conn()?.execute(
            r#"
            INSERT INTO subjects (id, kind, captioning_status, updated_at)
            VALUES (?1, 'user', ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET captioning_status = excluded.captioning_status
            "#,
            params![subject_id, status.as_str(), now],
        )?;
        Ok(())
    }

    pub fn get_captioning_status(&self, subject_id: &str) -> Result<Option<CaptioningStatus>> {
        let status: Option<Option<String>> = self
            .conn()?
            .query_row(
                "SELECT captioning_status FROM subjects WHERE id = ?1",
                params![subject_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status.flatten().as_deref().and_then(CaptioningStatus::parse))
    }

    /// Replace the stored enrichment for a photo
    pub fn upsert_caption(
        &self,
        photo_id: &str,
        subject_id: &str,
        image_path: &str,
        result: &EnrichmentResult,
    ) -> Result<()> {
        let tags_json = serde_json::to_string(&result.inferred_tags)?;
        let now = Utc::now().timestamp_micros();

        self.conn()?.execute(
            r#"
            INSERT INTO image_captions
                (photo_id, subject_id, image_path, caption_raw_en, caption_ko, inferred_tags, model_name, model_version, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(photo_id) DO UPDATE SET
                subject_id = excluded.subject_id,
                image_path = excluded.image_path,
                caption_raw_en = excluded.caption_raw_en,
                caption_ko = excluded.caption_ko,
                inferred_tags = excluded.inferred_tags,
                model_name = excluded.model_name,
                model_version = excluded.model_version,
                created_at = excluded.created_at
            "#,
            params![
                photo_id,
                subject_id,
                image_path,
                result.caption_en,
                result.caption_ko,
                tags_json,
                result.model_name,
                result.model_version,
                now,
            ],
        )?;
        Ok(())
    }

    /// Stored enrichments for a subject, newest first
    pub fn get_recent_enrichments(
        &self,
        subject_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredCaption>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT photo_id, image_path, caption_raw_en, caption_ko, inferred_tags, model_name, model_version
            FROM image_captions
            WHERE subject_id = ?1
            ORDER BY created_at DESC, photo_id
            LIMIT ?2
            "#,
        )?;

        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt.query_map(params![subject_id, limit], |row| {
            let tags_json: String = row.get(4)?;
            Ok(StoredCaption {
                photo_id: row.get(0)?,
                image_path: row.get(1)?,
                caption_en: row.get(2)?,
                caption_ko: row.get(3)?,
                inferred_tags: serde_json::from_str(&tags_json).unwrap_or_default(),
                model_name: row.get(5)?,
                model_version: row.get(6)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Annotated captions for a subject, newest first
    pub fn get_recent_captions(&self, subject_id: &str, limit: Option<usize>) -> Result<Vec<String>> {
        Ok(self
            .get_recent_enrichments(subject_id, limit)?
            .iter()
            .map(StoredCaption::annotated)
            .collect())
    }

    /// Get the active embedding of a subject
    pub fn get_active_embedding(&self, subject_id: &str) -> Result<Option<EmbeddingRecord>> {
        let result = self
            .conn()?
            .query_row(
                "SELECT subject_id, embedding, model_name, model_version, source_hash, updated_at FROM embeddings WHERE subject_id = ?1",
                params![subject_id],
                |row| {
                    let blob: Vec<u8> = row.get(1)?;
                    let micros: i64 = row.get(5)?;
                    Ok(EmbeddingRecord {
                        subject_id: row.get(0)?,
                        vector: blob_to_embedding(&blob),
                        model_name: row.get(2)?,
                        model_version: row.get(3)?,
                        source_hash: row.get(4)?,
                        updated_at: DateTime::from_timestamp_micros(micros).unwrap_or_default(),
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    /// Replace the active embedding; the previous vector is gone afterwards
    pub fn set_active_embedding(
        &self,
        subject_id: &str,
        embedding: &GeneratedEmbedding,
        source_hash: &str,
    ) -> Result<EmbeddingRecord> {
        let conn = self.conn()?;
        let previous: Option<i64> = conn
            .query_row(
                "SELECT updated_at FROM embeddings WHERE subject_id = ?1",
                params![subject_id],
                |row| row.get(0),
            )
            .optional()?;

        // Strictly increasing so a replacement always changes map signatures
        let mut now = Utc::now().timestamp_micros();
        if let Some(prev) = previous {
            now = now.max(prev + 1);
        }

        conn.execute(
            r#"
            INSERT INTO embeddings (subject_id, embedding, model_name, model_version, source_hash, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(subject_id) DO UPDATE SET
                embedding = excluded.embedding,
                model_name = excluded.model_name,
                model_version = excluded.model_version,
                source_hash = excluded.source_hash,
                updated_at = excluded.updated_at
            "#,
            params![
                subject_id,
                embedding_to_blob(&embedding.vector),
                embedding.model_name,
                embedding.model_version,
                source_hash,
                now,
            ],
        )?;

        Ok(EmbeddingRecord {
            subject_id: subject_id.to_string(),
            vector: embedding.vector.clone(),
            model_name: embedding.model_name.clone(),
            model_version: embedding.model_version.clone(),
            source_hash: source_hash.to_string(),
            updated_at: DateTime::from_timestamp_micros(now).unwrap_or_default(),
        })
    }

    /// Drop the active embedding of a subject
    pub fn deactivate_embeddings(&self, subject_id: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM embeddings WHERE subject_id = ?1", params![subject_id])?;
        Ok(())
    }

    /// Replace a group's member list, preserving the given order
    pub fn set_group_members(&self, group_id: &str, members: &[String]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM group_members WHERE group_id = ?1", params![group_id])?;
        for (position, user_id) in members.iter().enumerate() {
            tx.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, position) VALUES (?1, ?2, ?3)",
                params![group_id, user_id, position as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_group_members(&self, group_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![group_id], |row| row.get(0))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Groups a user belongs to
    pub fn get_user_groups(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT group_id FROM group_members WHERE user_id = ?1 ORDER BY group_id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| row.get(0))?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Get store statistics
    pub fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let subject_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM subjects", [], |row| row.get(0))?;
        let caption_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM image_captions", [], |row| row.get(0))?;
        let embedding_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))?;
        let last_embedded: Option<i64> = conn
            .query_row("SELECT MAX(updated_at) FROM embeddings", [], |row| row.get(0))
            .optional()?
            .flatten();

        Ok(StoreStats {
            subject_count: subject_count as usize,
            caption_count: caption_count as usize,
            embedding_count: embedding_count as usize,
            last_embedded: last_embedded.and_then(DateTime::from_timestamp_micros),
        })
    }
}

/// Convert f32 embedding to BLOB
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        blob.extend_from_slice(&val.to_le_bytes());
    }
    blob
}

/// Convert BLOB to f32 embedding
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

//! Append-only JSON log of embedding inputs and outputs
//!
//! One file per subject under the log directory. Each file holds a JSON array
//! and every regeneration appends one entry. Writing is best-effort: a failure
//! is reported as a warning and never interrupts the pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::store::EmbeddingRecord;
use crate::core::signal::ProfileSignal;

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_-]+").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingLogEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub user_name: Option<String>,
    pub input_text: String,
    pub input_text_lines: Vec<String>,
    pub image_captions: Vec<String>,
    pub image_tags: Vec<String>,
    pub embedding: Vec<f32>,
    pub model_name: String,
    pub model_version: Option<String>,
}

impl EmbeddingLogEntry {
    pub fn new(
        subject_id: &str,
        label: Option<&str>,
        input_text: &str,
        signal: &ProfileSignal,
        record: &EmbeddingRecord,
    ) -> Self {
        Self {
            timestamp: record.updated_at,
            user_id: subject_id.to_string(),
            user_name: label.map(str::to_string),
            input_text: input_text.to_string(),
            input_text_lines: input_text.lines().map(str::to_string).collect(),
            image_captions: signal.image_captions.clone(),
            image_tags: signal.inferred_tags.clone(),
            embedding: record.vector.clone(),
            model_name: record.model_name.clone(),
            model_version: record.model_version.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingLog {
    dir: PathBuf,
}

impl EmbeddingLog {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn path_for(&self, entry: &EmbeddingLogEntry) -> PathBuf {
        let stem = entry
            .user_name
            .as_deref()
            .and_then(safe_filename)
            .or_else(|| safe_filename(&entry.user_id))
            .unwrap_or_else(|| "subject".to_string());
        self.dir.join(format!("{}_embeddings.json", stem))
    }

    /// Append an entry, warning on failure
    pub fn append(&self, entry: &EmbeddingLogEntry) {
        if let Err(e) = self.try_append(entry) {
            warn!(subject_id = %entry.user_id, error = %e, "failed to write embedding log");
        }
    }

    pub fn try_append(&self, entry: &EmbeddingLogEntry) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let path = self.path_for(entry);
        let mut entries = read_entries(&path)?;
        entries.push(entry.clone());

        let json = serde_json::to_string_pretty(&entries)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}

/// Existing entries in a log file
///
/// A missing file, or valid JSON that is not an array, starts fresh. Anything
/// that fails to parse is an error so the file is never overwritten.
pub fn read_entries(path: &Path) -> Result<Vec<EmbeddingLogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    if !value.is_array() {
        return Ok(Vec::new());
    }
    serde_json::from_value(value).with_context(|| format!("Unexpected entries in {}", path.display()))
}

/// File-system safe stem, or `None` when nothing usable is left
pub fn safe_filename(name: &str) -> Option<String> {
    let cleaned = UNSAFE_CHARS.replace_all(name, "_");
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

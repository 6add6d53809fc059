pub mod compose;
pub mod embed;
pub mod enrich;
pub mod group;
pub mod init;
pub mod map;
pub mod profile;
pub mod search;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context as _, Result};

use affinity::{DataPaths, Pipeline, Services, Settings, SqliteStore};

/// Paths and settings shared by every command
pub struct Context {
    pub paths: DataPaths,
    pub settings: Settings,
}

impl Context {
    pub fn load(root: Option<PathBuf>) -> Result<Self> {
        let paths = match root {
            Some(root) => DataPaths::from_root(root),
            None => DataPaths::new(),
        };
        let settings = Settings::load(&paths.config)?;
        Ok(Self { paths, settings })
    }

    /// Open the database, creating the data folder on first use
    pub fn open_store(&self) -> Result<SqliteStore> {
        std::fs::create_dir_all(&self.paths.data)
            .with_context(|| format!("Failed to create {}", self.paths.data.display()))?;
        SqliteStore::open(&self.paths.database)
    }

    pub fn pipeline(&self) -> Pipeline {
        let services = Services::from_settings(&self.settings);
        Pipeline::from_settings(&self.settings, services, &self.paths.embedding_logs)
    }

    pub fn runtime(&self) -> Result<tokio::runtime::Runtime> {
        Ok(tokio::runtime::Runtime::new()?)
    }
}

use std::path::PathBuf;

/// On-disk layout of an affinity data root
pub struct DataPaths {
    pub root: PathBuf,
    pub config: PathBuf,
    pub data: PathBuf,
    pub database: PathBuf,
    pub embedding_logs: PathBuf,
}

impl DataPaths {
    pub fn new() -> Self {
        let root = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::from_root(root)
    }

    pub fn from_root(root: PathBuf) -> Self {
        Self {
            config: root.join("affinity.yaml"),
            data: root.join(".affinity"),
            database: root.join(".affinity/affinity.db"),
            embedding_logs: root.join(".affinity/user_embeddings"),
            root,
        }
    }

    pub fn required_folders(&self) -> Vec<(&PathBuf, &str)> {
        vec![
            (&self.data, "Database and caches"),
            (&self.embedding_logs, "Embedding input/output logs"),
        ]
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::new()
    }
}

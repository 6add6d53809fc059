//! affinity library
//!
//! Profile embeddings and group similarity maps.
//!
//! # Modules
//!
//! - `core`: Settings, data paths, profile signals and the canonical text
//! - `services`: Captioning, translation, tag inference and embedding collaborators
//! - `embedding`: Embedding generation, storage, change gating and similarity
//! - `enrich`: Photo enrichment pipeline and background queue
//! - `map`: 2-D group maps

pub mod core;
pub mod embedding;
pub mod enrich;
pub mod map;
pub mod services;

// Re-exports for convenience
pub use self::core::config::Settings;
pub use self::core::fingerprint::fingerprint;
pub use self::core::paths::DataPaths;
pub use self::core::schema::{CaptioningStatus, SubjectKind};
pub use self::core::signal::{compose, ProfileSignal};
pub use embedding::{EmbeddingGate, EmbeddingGenerator, SqliteStore};
pub use enrich::{BatchJob, EnrichmentQueue, EnrichmentResult, Orchestrator, PhotoJob, Pipeline};
pub use map::{MapProjector, MemberInput};
pub use services::Services;

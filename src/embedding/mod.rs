//! Profile embeddings: generation, storage, change gating and similarity

pub mod gate;
pub mod generator;
pub mod log;
pub mod similarity;
pub mod store;

pub use gate::{refresh_group_embedding, EmbeddingGate, RefreshOutcome};
pub use generator::{fallback_vector, EmbeddingGenerator, GeneratedEmbedding};
pub use log::{EmbeddingLog, EmbeddingLogEntry};
pub use similarity::{
    cosine_similarity, mean_vector, rank_groups, rank_groups_for_user, GroupCandidate, RankedGroup,
};
pub use store::{EmbeddingRecord, SqliteStore, StoreStats, StoredCaption, SubjectProfile};

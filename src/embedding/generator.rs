//! Embedding generation with a reproducible offline fallback
//!
//! The service is tried first. Any failure, including a missing API key,
//! produces a pseudo-random vector seeded from SHA-256 of the text, so the
//! same profile always lands on the same point even without network access.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha12Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::services::{with_timeout, EmbeddingService, ServiceError};

/// Model version recorded on fallback vectors
pub const FALLBACK_MODEL_VERSION: &str = "mock";

/// Vector plus the identity of whatever produced it
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedEmbedding {
    pub vector: Vec<f32>,
    pub model_name: String,
    pub model_version: Option<String>,
}

impl GeneratedEmbedding {
    pub fn is_fallback(&self) -> bool {
        self.model_version.as_deref() == Some(FALLBACK_MODEL_VERSION)
    }
}

pub struct EmbeddingGenerator {
    service: Arc<dyn EmbeddingService>,
    model_name: String,
    dim: usize,
    timeout: Duration,
}

impl EmbeddingGenerator {
    pub fn new(
        service: Arc<dyn EmbeddingService>,
        model_name: &str,
        dim: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            service,
            model_name: model_name.to_string(),
            dim,
            timeout,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Whether a fallback vector could be replaced by a real one
    pub fn can_replace_fallback(&self) -> bool {
        self.service.is_configured()
    }

    /// Embed text; never fails
    pub async fn generate(&self, text: &str) -> GeneratedEmbedding {
        let start = Instant::now();
        let result = with_timeout(self.timeout, self.service.embed(text))
            .await
            .and_then(|embedded| {
                if embedded.vector.len() == self.dim {
                    Ok(embedded)
                } else {
                    Err(ServiceError::Malformed(format!(
                        "expected {} dimensions, got {}",
                        self.dim,
                        embedded.vector.len()
                    )))
                }
            });

        match result {
            Ok(embedded) => {
                debug!(
                    model = %embedded.model_name,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "embedding generated"
                );
                GeneratedEmbedding {
                    vector: embedded.vector,
                    model_name: embedded.model_name,
                    model_version: embedded.model_version,
                }
            }
            Err(ServiceError::NotConfigured(what)) => {
                debug!(missing = what, "embedding service not configured, using fallback");
                self.fallback(text)
            }
            Err(e) => {
                warn!(error = %e, "embedding service failed, using fallback");
                self.fallback(text)
            }
        }
    }

    fn fallback(&self, text: &str) -> GeneratedEmbedding {
        GeneratedEmbedding {
            vector: fallback_vector(text, self.dim),
            model_name: self.model_name.clone(),
            model_version: Some(FALLBACK_MODEL_VERSION.to_string()),
        }
    }
}

/// `dim` uniform(-1, 1) draws from ChaCha12 seeded by the first 8 digest bytes
///
/// A named generator rather than `StdRng`, whose algorithm may change between
/// `rand` releases and would silently move every stored fallback vector.
pub fn fallback_vector(text: &str, dim: usize) -> Vec<f32> {
    let mut rng = ChaCha12Rng::seed_from_u64(fallback_seed(text));
    (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect()
}

fn fallback_seed(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut seed_bytes = [0u8; 8];
    seed_bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(seed_bytes)
}

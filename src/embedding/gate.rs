//! Change gate in front of the embedding generator
//!
//! A subject's signal is composed and fingerprinted on every request. When the
//! fingerprint equals the one stored with the active embedding, the stored
//! vector is reused and the service is never called.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use super::generator::{EmbeddingGenerator, GeneratedEmbedding};
use super::log::{EmbeddingLog, EmbeddingLogEntry};
use super::similarity::mean_vector;
use super::store::{EmbeddingRecord, SqliteStore};
use crate::core::fingerprint::fingerprint;
use crate::core::signal::{compose, ProfileSignal};

/// Model name recorded on derived group vectors
pub const GROUP_MEAN_MODEL: &str = "group-mean";

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Fingerprint matched; the stored vector was kept
    Reused(EmbeddingRecord),
    /// A new vector replaced the previous one
    Generated(EmbeddingRecord),
}

impl RefreshOutcome {
    pub fn record(&self) -> &EmbeddingRecord {
        match self {
            Self::Reused(record) | Self::Generated(record) => record,
        }
    }

    pub fn was_generated(&self) -> bool {
        matches!(self, Self::Generated(_))
    }
}

pub struct EmbeddingGate {
    generator: Arc<EmbeddingGenerator>,
    caption_limit: Option<usize>,
    log: Option<EmbeddingLog>,
}

impl EmbeddingGate {
    pub fn new(generator: Arc<EmbeddingGenerator>, caption_limit: Option<usize>) -> Self {
        Self {
            generator,
            caption_limit,
            log: None,
        }
    }

    pub fn with_log(mut self, log: EmbeddingLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Assemble the signal for a subject from its stored profile and captions
    pub fn build_signal(&self, store: &SqliteStore, subject_id: &str) -> Result<ProfileSignal> {
        let profile = store.get_subject(subject_id)?;
        let enrichments = store.get_recent_enrichments(subject_id, self.caption_limit)?;

        let captions = enrichments.iter().map(|e| e.annotated()).collect();
        let inferred = enrichments
            .iter()
            .flat_map(|e| e.inferred_tags.iter().cloned())
            .collect();

        let (tags, description) = match profile {
            Some(p) => (p.selected_tags, p.description),
            None => (Vec::new(), None),
        };

        Ok(ProfileSignal::new(tags, description, captions).with_inferred_tags(inferred))
    }

    /// Recompute a subject's embedding from what is stored, if anything changed
    pub async fn refresh(&self, store: &SqliteStore, subject_id: &str) -> Result<RefreshOutcome> {
        let signal = self.build_signal(store, subject_id)?;
        self.refresh_signal(store, subject_id, &signal).await
    }

    /// Recompute a subject's embedding from an explicit signal
    pub async fn refresh_signal(
        &self,
        store: &SqliteStore,
        subject_id: &str,
        signal: &ProfileSignal,
    ) -> Result<RefreshOutcome> {
        let text = compose(signal);
        let source_hash = fingerprint(&text);

        if let Some(active) = store.get_active_embedding(subject_id)? {
            let retry_fallback = active.is_fallback() && self.generator.can_replace_fallback();
            if active.source_hash == source_hash
                && active.vector.len() == self.generator.dim()
                && !retry_fallback
            {
                debug!(subject_id, "profile unchanged, reusing embedding");
                return Ok(RefreshOutcome::Reused(active));
            }
            if retry_fallback {
                debug!(subject_id, "retrying service for fallback embedding");
            }
        }

        let embedding = self.generator.generate(&text).await;
        let record = store.set_active_embedding(subject_id, &embedding, &source_hash)?;
        info!(
            subject_id,
            model = %record.model_name,
            fallback = embedding.is_fallback(),
            "embedding replaced"
        );

        if let Some(log) = &self.log {
            let label = store.get_subject(subject_id)?.and_then(|s| s.label);
            log.append(&EmbeddingLogEntry::new(
                subject_id,
                label.as_deref(),
                &text,
                signal,
                &record,
            ));
        }

        for group_id in store.get_user_groups(subject_id)? {
            refresh_group_embedding(store, &group_id)?;
        }

        Ok(RefreshOutcome::Generated(record))
    }
}

/// Recompute a group's vector as the mean of its members' active embeddings
///
/// Members without an embedding are skipped. With no member embeddings the
/// group's vector is removed.
pub fn refresh_group_embedding(store: &SqliteStore, group_id: &str) -> Result<Option<EmbeddingRecord>> {
    let mut member_vectors = Vec::new();
    let mut hash_input = String::new();
    for user_id in store.get_group_members(group_id)? {
        if let Some(record) = store.get_active_embedding(&user_id)? {
            hash_input.push_str(&format!("{}:{}\n", user_id, record.source_hash));
            member_vectors.push(record.vector);
        }
    }

    let mean = match mean_vector(member_vectors.iter().map(Vec::as_slice)) {
        Some(mean) => mean,
        None => {
            store.deactivate_embeddings(group_id)?;
            debug!(group_id, "no member embeddings, group vector cleared");
            return Ok(None);
        }
    };

    let source_hash = fingerprint(&hash_input);
    if let Some(active) = store.get_active_embedding(group_id)? {
        if active.source_hash == source_hash {
            return Ok(Some(active));
        }
    }

    let embedding = GeneratedEmbedding {
        vector: mean,
        model_name: GROUP_MEAN_MODEL.to_string(),
        model_version: None,
    };
    let record = store.set_active_embedding(group_id, &embedding, &source_hash)?;
    debug!(group_id, members = member_vectors.len(), "group vector recomputed");
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::SubjectKind;
    use crate::services::{Embedded, EmbeddingService, ServiceError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingService for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Embedded, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Embedded {
                vector: vec![text.len() as f32, 1.0, 0.0, 0.0],
                model_name: "counting".to_string(),
                model_version: Some("1".to_string()),
            })
        }
    }

    /// Fails the first `outages` calls, then answers
    struct FlakyEmbedder {
        calls: AtomicUsize,
        outages: usize,
    }

    #[async_trait]
    impl EmbeddingService for FlakyEmbedder {
        async fn embed(&self, _text: &str) -> Result<Embedded, ServiceError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.outages {
                return Err(ServiceError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(Embedded {
                vector: vec![0.0, 1.0, 0.0, 0.0],
                model_name: "flaky".to_string(),
                model_version: Some("1".to_string()),
            })
        }
    }

    struct OfflineEmbedder;

    #[async_trait]
    impl EmbeddingService for OfflineEmbedder {
        async fn embed(&self, _text: &str) -> Result<Embedded, ServiceError> {
            Err(ServiceError::NotConfigured("OPENAI_API_KEY"))
        }

        fn is_configured(&self) -> bool {
            false
        }
    }

    fn gate(embedder: Arc<CountingEmbedder>) -> EmbeddingGate {
        let generator = EmbeddingGenerator::new(embedder, "counting", 4, Duration::from_secs(1));
        EmbeddingGate::new(Arc::new(generator), Some(20))
    }

    #[tokio::test]
    async fn test_identical_signal_calls_service_once() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let gate = gate(embedder.clone());
        let signal = ProfileSignal::new(vec!["hiking".into()], Some("hi".into()), Vec::new());

        let first = gate.refresh_signal(&store, "u1", &signal).await?;
        let second = gate.refresh_signal(&store, "u1", &signal).await?;

        assert!(first.was_generated());
        assert!(!second.was_generated());
        assert_eq!(first.record(), second.record());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_changed_signal_regenerates() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let gate = gate(embedder.clone());

        let a = ProfileSignal::new(vec!["hiking".into()], None, Vec::new());
        let b = ProfileSignal::new(vec!["hiking".into(), "coffee".into()], None, Vec::new());
        let first = gate.refresh_signal(&store, "u1", &a).await?;
        let second = gate.refresh_signal(&store, "u1", &b).await?;

        assert!(second.was_generated());
        assert!(second.record().updated_at > first.record().updated_at);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_fallback_vector_replaced_after_outage() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let embedder = Arc::new(FlakyEmbedder {
            calls: AtomicUsize::new(0),
            outages: 1,
        });
        let generator = EmbeddingGenerator::new(embedder.clone(), "flaky", 4, Duration::from_secs(1));
        let gate = EmbeddingGate::new(Arc::new(generator), Some(20));
        let signal = ProfileSignal::new(vec!["hiking".into()], None, Vec::new());

        let first = gate.refresh_signal(&store, "u1", &signal).await?;
        assert!(first.record().is_fallback());

        let second = gate.refresh_signal(&store, "u1", &signal).await?;
        assert!(second.was_generated());
        assert!(!second.record().is_fallback());
        assert_eq!(second.record().vector, vec![0.0, 1.0, 0.0, 0.0]);

        let third = gate.refresh_signal(&store, "u1", &signal).await?;
        assert!(!third.was_generated());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_offline_fallback_is_reused() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let generator = EmbeddingGenerator::new(Arc::new(OfflineEmbedder), "offline", 4, Duration::from_secs(1));
        let gate = EmbeddingGate::new(Arc::new(generator), Some(20));
        let signal = ProfileSignal::new(vec!["hiking".into()], None, Vec::new());

        assert!(gate.refresh_signal(&store, "u1", &signal).await?.was_generated());
        let again = gate.refresh_signal(&store, "u1", &signal).await?;
        assert!(!again.was_generated());
        assert!(again.record().is_fallback());
        Ok(())
    }

    #[tokio::test]
    async fn test_build_signal_from_store() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        store.upsert_subject(
            "u1",
            SubjectKind::User,
            None,
            &["여행".to_string()],
            Some(" 안녕 "),
        )?;
        store.upsert_caption(
            "p1",
            "u1",
            "a.jpg",
            &crate::enrich::EnrichmentResult {
                caption_en: "a mountain".into(),
                caption_ko: "산".into(),
                inferred_tags: vec!["등산".into()],
                model_name: "blip-base".into(),
                model_version: None,
            },
        )?;

        let gate = gate(Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        }));
        let signal = gate.build_signal(&store, "u1")?;
        assert_eq!(signal.merged_tags(), vec!["여행", "등산"]);
        assert_eq!(signal.image_captions, vec!["산 | inferred: 등산"]);
        assert_eq!(
            compose(&signal),
            "[SelectedTags]\n여행, 등산\n[UserDescription]\n안녕\n[ImageCaptions]\n산 | inferred: 등산\n"
        );
        Ok(())
    }

    #[test]
    fn test_group_embedding_is_member_mean() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let embed = |v: Vec<f32>| GeneratedEmbedding {
            vector: v,
            model_name: "m".into(),
            model_version: None,
        };
        store.set_active_embedding("u1", &embed(vec![1.0, 0.0]), "h1")?;
        store.set_active_embedding("u2", &embed(vec![3.0, 2.0]), "h2")?;
        store.set_group_members("g1", &["u1".into(), "u2".into(), "u3".into()])?;

        let group = refresh_group_embedding(&store, "g1")?.unwrap();
        assert_eq!(group.vector, vec![2.0, 1.0]);
        assert_eq!(group.model_name, GROUP_MEAN_MODEL);

        // Unchanged membership keeps the same row
        let again = refresh_group_embedding(&store, "g1")?.unwrap();
        assert_eq!(again.updated_at, group.updated_at);

        store.set_group_members("g1", &["u3".into()])?;
        assert!(refresh_group_embedding(&store, "g1")?.is_none());
        assert!(store.get_active_embedding("g1")?.is_none());
        Ok(())
    }
}

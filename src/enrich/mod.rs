//! Photo enrichment pipeline
//!
//! A batch is a subject plus its photos. Each photo is enriched and stored;
//! afterwards the subject's embedding is refreshed through the change gate and
//! its `captioning_status` moves to `done`, or to `failed` on a storage error.

pub mod orchestrator;
pub mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::core::config::Settings;
use crate::core::schema::CaptioningStatus;
use crate::core::signal::annotate_caption;
use crate::embedding::{EmbeddingGate, EmbeddingGenerator, EmbeddingLog, RefreshOutcome, SqliteStore};
use crate::services::Services;

pub use orchestrator::{fallback_caption, Orchestrator, FALLBACK_CAPTION_MODEL};
pub use worker::{EnrichmentQueue, JobRunner, PipelineRunner, QueueError, QueueStats};

/// Output of enriching one photo
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentResult {
    pub caption_en: String,
    pub caption_ko: String,
    pub inferred_tags: Vec<String>,
    pub model_name: String,
    pub model_version: Option<String>,
}

impl EnrichmentResult {
    /// Caption as it feeds the composer
    pub fn annotated_caption(&self) -> String {
        annotate_caption(&self.caption_ko, &self.inferred_tags)
    }

    pub fn is_fallback_caption(&self) -> bool {
        self.model_name == FALLBACK_CAPTION_MODEL
    }
}

#[derive(Debug, Clone)]
pub struct PhotoJob {
    pub photo_id: String,
    pub path: PathBuf,
}

impl PhotoJob {
    pub fn new(photo_id: &str, path: &Path) -> Self {
        Self {
            photo_id: photo_id.to_string(),
            path: path.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub subject_id: String,
    pub photos: Vec<PhotoJob>,
    pub refresh_embedding: bool,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub subject_id: String,
    pub photos: usize,
    pub fallback_captions: usize,
    pub embedding: Option<RefreshOutcome>,
}

pub struct Pipeline {
    orchestrator: Orchestrator,
    gate: EmbeddingGate,
}

impl Pipeline {
    pub fn new(orchestrator: Orchestrator, gate: EmbeddingGate) -> Self {
        Self { orchestrator, gate }
    }

    /// Wire the pipeline from settings; `log_dir` is used only when the IO log is on
    pub fn from_settings(settings: &Settings, services: Services, log_dir: &Path) -> Self {
        let generator = EmbeddingGenerator::new(
            services.embedder.clone(),
            &settings.embedding.model,
            settings.embedding.dim,
            settings.timeouts.embed(),
        );
        let mut gate = EmbeddingGate::new(Arc::new(generator), settings.pipeline.recent_caption_limit);
        if settings.pipeline.embedding_log {
            gate = gate.with_log(EmbeddingLog::new(log_dir));
        }

        Self::new(Orchestrator::new(services, settings.timeouts.clone()), gate)
    }

    pub fn gate(&self) -> &EmbeddingGate {
        &self.gate
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Run a batch in the caller's task, e.g. a single-photo upload
    pub async fn process_inline(&self, store: &SqliteStore, job: &BatchJob) -> Result<BatchReport> {
        store.set_captioning_status(&job.subject_id, CaptioningStatus::Processing)?;
        self.process_batch(store, job).await
    }

    /// Mark the subject as processing and hand the batch to the queue
    ///
    /// Returns immediately. A rejected submission leaves the subject `failed`
    /// so the caller can retry.
    pub fn submit_batch(&self, store: &SqliteStore, queue: &EnrichmentQueue, job: BatchJob) -> Result<()> {
        let subject_id = job.subject_id.clone();
        store.set_captioning_status(&subject_id, CaptioningStatus::Processing)?;

        if let Err(e) = queue.submit(job) {
            store.set_captioning_status(&subject_id, CaptioningStatus::Failed)?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Enrich every photo, then refresh the embedding and settle the status
    pub async fn process_batch(&self, store: &SqliteStore, job: &BatchJob) -> Result<BatchReport> {
        match self.run_batch(store, job).await {
            Ok(report) => {
                store.set_captioning_status(&job.subject_id, CaptioningStatus::Done)?;
                info!(
                    subject_id = %job.subject_id,
                    photos = report.photos,
                    fallback_captions = report.fallback_captions,
                    "enrichment finished"
                );
                Ok(report)
            }
            Err(e) => {
                error!(subject_id = %job.subject_id, error = %e, "enrichment failed");
                if let Err(status_err) = store.set_captioning_status(&job.subject_id, CaptioningStatus::Failed) {
                    error!(subject_id = %job.subject_id, error = %status_err, "could not record failure");
                }
                Err(e)
            }
        }
    }

    async fn run_batch(&self, store: &SqliteStore, job: &BatchJob) -> Result<BatchReport> {
        let mut fallback_captions = 0;

        for photo in &job.photos {
            let result = self.orchestrator.enrich_photo(&photo.photo_id, &photo.path).await;
            if result.is_fallback_caption() {
                fallback_captions += 1;
            }
            store.upsert_caption(
                &photo.photo_id,
                &job.subject_id,
                &photo.path.to_string_lossy(),
                &result,
            )?;
        }

        let embedding = if job.refresh_embedding {
            Some(self.gate.refresh(store, &job.subject_id).await?)
        } else {
            None
        };

        Ok(BatchReport {
            subject_id: job.subject_id.clone(),
            photos: job.photos.len(),
            fallback_captions,
            embedding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::orchestrator::tests::*;
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn pipeline(embedder: Arc<CountingEmbedder>, caption_delay: u64) -> Pipeline {
        let captioner = Arc::new(SleepingCaptioner {
            delay: Duration::from_secs(caption_delay),
            ready: AtomicBool::new(true),
        });
        let services = services(captioner, Arc::new(EchoTranslator), embedder.clone());
        let generator = EmbeddingGenerator::new(embedder, "counting", 4, Duration::from_secs(30));
        Pipeline::new(
            Orchestrator::new(services, timeouts()),
            EmbeddingGate::new(Arc::new(generator), Some(20)),
        )
    }

    fn batch(photos: &[&str]) -> BatchJob {
        BatchJob {
            subject_id: "u1".to_string(),
            photos: photos
                .iter()
                .map(|name| PhotoJob::new(name, Path::new(&format!("/photos/{}.jpg", name))))
                .collect(),
            refresh_embedding: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_stores_captions_and_embeds() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            dim: 4,
        });
        let pipeline = pipeline(embedder.clone(), 1);

        let report = pipeline.process_inline(&store, &batch(&["p1", "p2"])).await?;
        assert_eq!(report.photos, 2);
        assert_eq!(report.fallback_captions, 0);
        assert!(report.embedding.as_ref().is_some_and(|e| e.was_generated()));

        assert_eq!(store.get_recent_enrichments("u1", None)?.len(), 2);
        assert_eq!(store.get_captioning_status("u1")?, Some(CaptioningStatus::Done));
        assert!(store.get_active_embedding("u1")?.is_some());

        // Same captions again: the gate reuses the stored vector
        let again = pipeline.process_inline(&store, &batch(&["p1", "p2"])).await?;
        assert!(again.embedding.is_some_and(|e| !e.was_generated()));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_caption_timeouts_do_not_abort_batch() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            dim: 4,
        });
        let pipeline = pipeline(embedder, 60);

        let report = pipeline.process_inline(&store, &batch(&["p1", "p2", "p3"])).await?;
        assert_eq!(report.fallback_captions, 3);

        let captions = store.get_recent_enrichments("u1", None)?;
        assert_eq!(captions.len(), 3);
        assert!(captions.iter().all(|c| c.caption_en.starts_with("an uploaded image (")));
        assert_eq!(store.get_captioning_status("u1")?, Some(CaptioningStatus::Done));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_refresh_leaves_embedding_alone() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            dim: 4,
        });
        let pipeline = pipeline(embedder.clone(), 1);

        let mut job = batch(&["p1"]);
        job.refresh_embedding = false;
        let report = pipeline.process_inline(&store, &job).await?;

        assert!(report.embedding.is_none());
        assert!(store.get_active_embedding("u1")?.is_none());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_error_marks_failed() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let embedder = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
            dim: 4,
        });
        let pipeline = pipeline(embedder.clone(), 1);
        store.execute_batch("DROP TABLE image_captions")?;

        assert!(pipeline.process_inline(&store, &batch(&["p1"])).await.is_err());
        assert_eq!(store.get_captioning_status("u1")?, Some(CaptioningStatus::Failed));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }
}

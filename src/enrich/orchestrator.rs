//! Per-photo enrichment: caption, translate, infer interest tags
//!
//! Every stage has its own deadline and its own fallback, so `enrich_photo`
//! always produces a usable result.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::EnrichmentResult;
use crate::core::config::TimeoutSettings;
use crate::services::{with_timeout, Caption, ServiceError, Services};

/// Model name recorded on synthesized captions
pub const FALLBACK_CAPTION_MODEL: &str = "fallback";

pub struct Orchestrator {
    services: Services,
    timeouts: TimeoutSettings,
}

impl Orchestrator {
    pub fn new(services: Services, timeouts: TimeoutSettings) -> Self {
        Self { services, timeouts }
    }

    /// Caption deadline; widened while the captioner is still warming up
    pub fn caption_timeout(&self) -> Duration {
        if self.services.captioner.is_ready() {
            self.timeouts.caption()
        } else {
            self.timeouts.caption_cold()
        }
    }

    pub async fn enrich_photo(&self, photo_id: &str, image_path: &Path) -> EnrichmentResult {
        let start = Instant::now();

        let caption = self.caption_stage(photo_id, image_path).await;
        let caption_ko = self.translate_stage(photo_id, &caption.text).await;
        let inferred_tags = self.interest_stage(photo_id, &caption_ko).await;

        debug!(
            photo_id,
            model = %caption.model_name,
            tags = inferred_tags.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "photo enriched"
        );

        EnrichmentResult {
            caption_en: caption.text,
            caption_ko,
            inferred_tags,
            model_name: caption.model_name,
            model_version: caption.model_version,
        }
    }

    async fn caption_stage(&self, photo_id: &str, image_path: &Path) -> Caption {
        if !self.services.captioner.is_ready() {
            self.services.captioner.check_ready().await;
        }
        let limit = self.caption_timeout();
        let result = with_timeout(limit, self.services.captioner.caption(image_path))
            .await
            .and_then(|caption| {
                if caption.text.trim().is_empty() {
                    Err(ServiceError::Malformed("empty caption".to_string()))
                } else {
                    Ok(caption)
                }
            });

        match result {
            Ok(caption) => caption,
            Err(e) => {
                stage_failed(photo_id, "caption", &e);
                fallback_caption(image_path)
            }
        }
    }

    async fn translate_stage(&self, photo_id: &str, caption: &str) -> String {
        let call = self.services.translator.translate_to_target_language(caption);
        match with_timeout(self.timeouts.translate(), call).await {
            Ok(translated) if !translated.trim().is_empty() => translated.trim().to_string(),
            Ok(_) => caption.to_string(),
            Err(e) => {
                stage_failed(photo_id, "translate", &e);
                caption.to_string()
            }
        }
    }

    async fn interest_stage(&self, photo_id: &str, caption: &str) -> Vec<String> {
        match with_timeout(self.timeouts.interest(), self.services.tagger.infer_tags(caption)).await {
            Ok(tags) => tags,
            Err(e) => {
                stage_failed(photo_id, "interest", &e);
                Vec::new()
            }
        }
    }
}

/// Offline services are expected; anything else is worth a warning
fn stage_failed(photo_id: &str, stage: &'static str, error: &ServiceError) {
    match error {
        ServiceError::NotConfigured(_) => {
            debug!(photo_id, stage, error = %error, "stage skipped, using fallback")
        }
        _ => warn!(photo_id, stage, error = %error, "stage failed, using fallback"),
    }
}

/// `an uploaded image (<file name>)`
pub fn fallback_caption(image_path: &Path) -> Caption {
    let file_name = image_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| image_path.display().to_string());

    Caption {
        text: format!("an uploaded image ({})", file_name),
        model_name: FALLBACK_CAPTION_MODEL.to_string(),
        model_version: None,
    }
}

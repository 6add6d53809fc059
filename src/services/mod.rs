//! External model collaborators
//!
//! Captioning, translation, interest-tag inference and text embedding are opaque
//! services. The pipeline only sees these traits; every call goes through
//! [`with_timeout`] and every error is recoverable by the caller's fallback.

pub mod captioner;
pub mod openai;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::config::Settings;

pub use captioner::{HttpCaptioner, UnavailableCaptioner};
pub use openai::{OpenAiClient, OpenAiEmbedder};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// English caption plus the identity of the model that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub text: String,
    pub model_name: String,
    pub model_version: Option<String>,
}

/// Raw service embedding
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub model_name: String,
    pub model_version: Option<String>,
}

#[async_trait]
pub trait CaptionService: Send + Sync {
    async fn caption(&self, image_path: &Path) -> Result<Caption, ServiceError>;

    /// False until the one-time model warm-up has completed
    fn is_ready(&self) -> bool;

    /// Ask the service whether warm-up has finished since the last call
    async fn check_ready(&self) -> bool {
        self.is_ready()
    }
}

#[async_trait]
pub trait TranslationService: Send + Sync {
    async fn translate_to_target_language(&self, text: &str) -> Result<String, ServiceError>;
}

#[async_trait]
pub trait TagInferenceService: Send + Sync {
    /// Zero to three short interest tags
    async fn infer_tags(&self, text: &str) -> Result<Vec<String>, ServiceError>;
}

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedded, ServiceError>;

    /// False when every call is known to fail with `NotConfigured`
    fn is_configured(&self) -> bool {
        true
    }
}

/// Run a service call under a deadline; the future is dropped on expiry
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout(limit)),
    }
}

/// The four collaborators wired together for one process
#[derive(Clone)]
pub struct Services {
    pub captioner: Arc<dyn CaptionService>,
    pub translator: Arc<dyn TranslationService>,
    pub tagger: Arc<dyn TagInferenceService>,
    pub embedder: Arc<dyn EmbeddingService>,
}

impl Services {
    pub fn from_settings(settings: &Settings) -> Self {
        let http = reqwest::Client::new();
        let openai = Arc::new(OpenAiClient::new(
            http.clone(),
            settings.openai.api_key.clone(),
            &settings.openai.base_url,
            &settings.openai.translation_model,
        ));

        let captioner: Arc<dyn CaptionService> = match &settings.captioning.endpoint {
            Some(endpoint) => Arc::new(HttpCaptioner::new(http, endpoint)),
            None => Arc::new(UnavailableCaptioner),
        };

        let embedder = Arc::new(OpenAiEmbedder::new(
            openai.clone(),
            &settings.embedding.model,
            settings.embedding.model_version.clone(),
            settings.embedding.dim,
        ));

        Self {
            captioner,
            translator: openai.clone(),
            tagger: openai,
            embedder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_expires() {
        let result: Result<(), ServiceError> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ServiceError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, ServiceError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_offline_settings_build_services() {
        let services = Services::from_settings(&Settings::default());
        assert!(services.captioner.is_ready());
    }
}

//! Image captioning collaborators
//!
//! The captioning model runs out of process (a BLIP sidecar). Its first request
//! triggers a slow one-time model load; `is_ready` stays false until a caption
//! has come back or `GET {endpoint}/health` reports the model loaded, so the
//! orchestrator can widen the deadline instead of failing cold.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Caption, CaptionService, ServiceError};

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    caption: String,
    model_name: String,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    ready: bool,
    #[serde(default)]
    model_name: Option<String>,
}

const HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Captioning over HTTP: `POST {endpoint}/caption` with the image as multipart
pub struct HttpCaptioner {
    http: reqwest::Client,
    endpoint: String,
    ready: AtomicBool,
}

impl HttpCaptioner {
    pub fn new(http: reqwest::Client, endpoint: &str) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            ready: AtomicBool::new(false),
        }
    }

    fn mark_ready(&self, model_name: &str) {
        if !self.ready.swap(true, Ordering::AcqRel) {
            info!(model = %model_name, "captioning model warmed up");
        }
    }

    async fn health(&self) -> Result<HealthResponse, ServiceError> {
        let url = format!("{}/health", self.endpoint);
        let response = self.http.get(&url).timeout(HEALTH_TIMEOUT).send().await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CaptionService for HttpCaptioner {
    async fn caption(&self, image_path: &Path) -> Result<Caption, ServiceError> {
        let bytes = tokio::fs::read(image_path).await?;
        let file_name = image_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();

        debug!(image = %file_name, size = bytes.len(), "caption request");

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("image", part);
        let url = format!("{}/caption", self.endpoint);

        let response = self.http.post(&url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(ServiceError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: CaptionResponse = response.json().await?;
        self.mark_ready(&body.model_name);

        Ok(Caption {
            text: body.caption.trim().to_string(),
            model_name: body.model_name,
            model_version: body.model_version,
        })
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn check_ready(&self) -> bool {
        if self.is_ready() {
            return true;
        }
        match self.health().await {
            Ok(health) if health.ready => {
                self.mark_ready(health.model_name.as_deref().unwrap_or("captioner"));
                true
            }
            Ok(_) => false,
            Err(e) => {
                debug!(error = %e, "captioner health check failed");
                false
            }
        }
    }
}

/// Stand-in when no captioning endpoint is configured
///
/// Reports ready so the caption deadline is never widened for a service that
/// will not answer anyway.
pub struct UnavailableCaptioner;

#[async_trait]
impl CaptionService for UnavailableCaptioner {
    async fn caption(&self, _image_path: &Path) -> Result<Caption, ServiceError> {
        Err(ServiceError::NotConfigured("captioning endpoint"))
    }

    fn is_ready(&self) -> bool {
        true
    }
}

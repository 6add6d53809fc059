//! OpenAI-backed translation, interest inference and embeddings

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Embedded, EmbeddingService, ServiceError, TagInferenceService, TranslationService};
use crate::core::signal::normalize_items;

/// Maximum number of interest tags kept per caption
pub const MAX_INFERRED_TAGS: usize = 3;

const TRANSLATE_PROMPT: &str = "Translate the text to Korean. Return only the translation.";

const INTEREST_PROMPT: &str = "Infer 0-3 likely hobbies/interests from the image caption. \
Prefer higher-level hobby tags over literal objects. \
Return JSON only: {\"tags\": [\"...\"]}. Use short Korean nouns. \
If uncertain, return an empty list.";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Thin OpenAI REST client; a missing key makes every call `NotConfigured`
pub struct OpenAiClient {
    api_key: Option<String>,
    http: reqwest::Client,
    base_url: String,
    chat_model: String,
}

impl OpenAiClient {
    pub fn new(
        http: reqwest::Client,
        api_key: Option<String>,
        base_url: &str,
        chat_model: &str,
    ) -> Self {
        Self {
            api_key,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_model: chat_model.to_string(),
        }
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn headers(&self) -> Result<HeaderMap, ServiceError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(ServiceError::NotConfigured("OPENAI_API_KEY"))?;
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ServiceError::Malformed(e.to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status { status, body });
        }

        Ok(response.json().await?)
    }

    async fn chat(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
        json_mode: bool,
    ) -> Result<String, ServiceError> {
        debug!(model = %self.chat_model, json_mode, "openai chat request");

        let request = ChatRequest {
            model: &self.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            response_format: json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response: ChatResponse = self.post_json("chat/completions", &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .ok_or_else(|| ServiceError::Malformed("no choices in chat response".to_string()))
    }

    pub async fn embed(
        &self,
        model: &str,
        text: &str,
        dimensions: Option<usize>,
    ) -> Result<Vec<f32>, ServiceError> {
        let request = EmbeddingRequest {
            model,
            input: text,
            dimensions,
        };
        let response: EmbeddingResponse = self.post_json("embeddings", &request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ServiceError::Malformed("no embedding in response".to_string()))
    }
}

#[async_trait]
impl TranslationService for OpenAiClient {
    async fn translate_to_target_language(&self, text: &str) -> Result<String, ServiceError> {
        if text.is_empty() {
            return Ok(String::new());
        }
        self.chat(TRANSLATE_PROMPT, text, 0.0, false).await
    }
}

#[async_trait]
impl TagInferenceService for OpenAiClient {
    async fn infer_tags(&self, text: &str) -> Result<Vec<String>, ServiceError> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let content = self.chat(INTEREST_PROMPT, text, 0.2, true).await?;
        Ok(parse_tags(&content))
    }
}

/// Parse an interest-inference reply into at most three clean tags
///
/// Accepts `{"tags": [...]}`, a bare JSON array, or comma separated text.
pub fn parse_tags(content: &str) -> Vec<String> {
    let raw: Vec<String> = match serde_json::from_str::<serde_json::Value>(content) {
        Ok(serde_json::Value::Object(map)) => map
            .get("tags")
            .and_then(|t| t.as_array())
            .map(|items| string_items(items))
            .unwrap_or_default(),
        Ok(serde_json::Value::Array(items)) => string_items(&items),
        Ok(_) => Vec::new(),
        Err(_) => content.split(',').map(|s| s.to_string()).collect(),
    };

    let mut tags = normalize_items(raw.iter().map(String::as_str));
    tags.truncate(MAX_INFERRED_TAGS);
    tags
}

fn string_items(items: &[serde_json::Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect()
}

/// Embedding service backed by the OpenAI embeddings endpoint
pub struct OpenAiEmbedder {
    client: Arc<OpenAiClient>,
    model: String,
    model_version: Option<String>,
    dim: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        client: Arc<OpenAiClient>,
        model: &str,
        model_version: Option<String>,
        dim: usize,
    ) -> Self {
        Self {
            client,
            model: model.to_string(),
            model_version,
            dim,
        }
    }

    /// Only the v3 family accepts a `dimensions` override
    fn requested_dimensions(&self) -> Option<usize> {
        self.model
            .starts_with("text-embedding-3-")
            .then_some(self.dim)
    }
}

#[async_trait]
impl EmbeddingService for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedded, ServiceError> {
        let vector = self
            .client
            .embed(&self.model, text, self.requested_dimensions())
            .await?;

        if vector.len() != self.dim {
            return Err(ServiceError::Malformed(format!(
                "expected {} dimensions, got {}",
                self.dim,
                vector.len()
            )));
        }

        Ok(Embedded {
            vector,
            model_name: self.model.clone(),
            model_version: self.model_version.clone(),
        })
    }

    fn is_configured(&self) -> bool {
        self.client.has_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_client() -> OpenAiClient {
        OpenAiClient::new(
            reqwest::Client::new(),
            None,
            "https://api.openai.com/v1/",
            "gpt-4o-mini",
        )
    }

    #[test]
    fn test_parse_tags_json_object() {
        let tags = parse_tags(r#"{"tags": ["등산", " 캠핑 ", "등산", "사진", "여행"]}"#);
        assert_eq!(tags, vec!["등산", "캠핑", "사진"]);
    }

    #[test]
    fn test_parse_tags_bare_array_skips_non_strings() {
        let tags = parse_tags(r#"["요리", 3, null, "베이킹"]"#);
        assert_eq!(tags, vec!["요리", "베이킹"]);
    }

    #[test]
    fn test_parse_tags_comma_fallback() {
        let tags = parse_tags("러닝, 마라톤,, 러닝");
        assert_eq!(tags, vec!["러닝", "마라톤"]);
    }

    #[test]
    fn test_parse_tags_unexpected_json() {
        assert!(parse_tags("42").is_empty());
        assert!(parse_tags(r#"{"labels": ["x"]}"#).is_empty());
    }

    #[test]
    fn test_dimensions_only_for_v3_models() {
        let client = Arc::new(offline_client());
        let v3 = OpenAiEmbedder::new(client.clone(), "text-embedding-3-small", None, 1024);
        let ada = OpenAiEmbedder::new(client, "text-embedding-ada-002", None, 1536);
        assert_eq!(v3.requested_dimensions(), Some(1024));
        assert_eq!(ada.requested_dimensions(), None);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_configured() {
        let client = offline_client();
        assert!(!client.has_key());
        let err = client
            .translate_to_target_language("a dog on a beach")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn test_empty_input_skips_call() {
        let client = offline_client();
        assert_eq!(client.translate_to_target_language("").await.unwrap(), "");
        assert!(client.infer_tags("").await.unwrap().is_empty());
    }
}

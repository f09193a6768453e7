//! HTTP embedding service client
//!
//! Talks to a local audio-text embedding service (for example a CLAP model
//! behind a small HTTP wrapper):
//!
//! - `GET  {endpoint}/health`       → 2xx once the model is loaded
//! - `POST {endpoint}/embed/audio`  `{"path": "..."}`   → `{"embedding": [f32]}`
//! - `POST {endpoint}/embed/text`   `{"texts": ["..."]}` → `{"embeddings": [[f32]]}`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::scorer::EmbeddingBackend;

const USER_AGENT: &str = concat!("themebank/", env!("CARGO_PKG_VERSION"));

/// Embedding client errors
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Network communication error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Service answered with a non-success status
    #[error("Embedding service error {0}: {1}")]
    ApiError(u16, String),

    /// Response body did not have the expected shape
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl From<EmbeddingClientError> for themebank_common::Error {
    fn from(err: EmbeddingClientError) -> Self {
        themebank_common::Error::External(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct AudioRequest<'a> {
    path: &'a str,
}

#[derive(Debug, Deserialize)]
struct AudioResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct TextRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct TextResponse {
    embeddings: Vec<Vec<f32>>,
}

/// [`EmbeddingBackend`] over HTTP
pub struct HttpEmbeddingBackend {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpEmbeddingBackend {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, EmbeddingClientError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingClientError::NetworkError(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, EmbeddingClientError>
    where
        Req: Serialize + ?Sized,
        Resp: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.endpoint, path);
        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| EmbeddingClientError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::ApiError(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| EmbeddingClientError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn load(&self) -> themebank_common::Result<()> {
        let url = format!("{}/health", self.endpoint);
        tracing::debug!(url = %url, "Checking embedding service");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| EmbeddingClientError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::ApiError(status.as_u16(), error_text).into());
        }
        Ok(())
    }

    async fn embed_audio(&self, path: &Path) -> themebank_common::Result<Vec<f32>> {
        // The service reads the file itself, so hand it an absolute path
        let absolute = std::fs::canonicalize(path)?;
        let path_str = absolute.to_string_lossy();
        let response: AudioResponse = self
            .post_json("/embed/audio", &AudioRequest { path: &path_str })
            .await?;

        if response.embedding.is_empty() {
            return Err(EmbeddingClientError::ParseError("empty audio embedding".to_string()).into());
        }
        Ok(response.embedding)
    }

    async fn embed_texts(&self, texts: &[String]) -> themebank_common::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response: TextResponse = self.post_json("/embed/text", &TextRequest { texts }).await?;
        Ok(response.embeddings)
    }
}

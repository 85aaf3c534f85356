use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::{DecisionError, Result};
use crate::retry::RetryPolicy;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize;
}

// OpenAI-compatible /embeddings endpoint
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

#[derive(Serialize)]
struct OpenAIRequest<'a, I: Serialize> {
    model: &'a str,
    input: I,
}

#[derive(Deserialize)]
struct OpenAIResponseData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIResponseData>,
}

impl OpenAIEmbedder {
    pub fn new(base_url: String, api_key: String, model: String, dims: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| DecisionError::Config {
                message: format!("Failed to build reqwest client with timeout: {}", e),
            })?;
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
            dims,
        })
    }

    async fn request<I: Serialize + Send + Sync>(&self, input: I) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let body = OpenAIRequest {
            model: &self.model,
            input,
        };
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DecisionError::Embedding {
                message: format!("Failed to send request to embedding API: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DecisionError::Embedding {
                message: format!("Embedding API error {}: {}", status, error_text),
            });
        }

        let mut parsed: OpenAIResponse =
            response.json().await.map_err(|e| DecisionError::Embedding {
                message: format!("Failed to parse embedding response: {}", e),
            })?;
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(
            "Generating embedding (model={}, chars={})",
            self.model,
            text.len()
        );
        self.request(text)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DecisionError::Embedding {
                message: "No embedding returned".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            "Generating {} embeddings in one request (model={})",
            texts.len(),
            self.model
        );
        self.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

// Deterministic, local FakeEmbedder for testing/dev (no network)
pub struct FakeEmbedder {
    dims: usize,
}

impl FakeEmbedder {
    pub fn new(dims: Option<usize>) -> Self {
        let d = dims.unwrap_or(768).max(1);
        Self { dims: d }
    }

    // Stable pseudo-random values in [-1.0, 1.0), normalised to unit length
    fn generate(&self, text: &str) -> Vec<f32> {
        let mut reader = blake3::Hasher::new()
            .update(text.as_bytes())
            .finalize_xof();
        let mut bytes = vec![0u8; self.dims * 4];
        reader.fill(&mut bytes);
        let mut out: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| {
                let val = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let v01 = (val as f32) / (u32::MAX as f32 + 1.0);
                v01 * 2.0 - 1.0
            })
            .collect();

        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut out {
                *v /= norm;
            }
        }
        out
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Embedding adapter used by the pipeline: provider calls under a backoff policy.
#[derive(Clone)]
pub struct EmbeddingClient {
    embedder: Arc<dyn Embedder>,
    policy: RetryPolicy,
}

impl EmbeddingClient {
    pub fn new(embedder: Arc<dyn Embedder>, policy: RetryPolicy) -> Self {
        Self { embedder, policy }
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    pub async fn embed(&self, text: &str, cancel: &CancellationToken) -> Result<Vec<f32>> {
        let vector = self
            .policy
            .run("embed", cancel, || self.embedder.embed(text))
            .await
            .map_err(wrap_service_error)?;
        self.check_dimensions(&vector)?;
        Ok(vector)
    }

    pub async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        let vectors = self
            .policy
            .run("embed_batch", cancel, || self.embedder.embed_batch(texts))
            .await
            .map_err(wrap_service_error)?;
        if vectors.len() != texts.len() {
            return Err(DecisionError::EmbeddingService {
                source: Box::new(DecisionError::Embedding {
                    message: format!(
                        "batch returned {} vectors for {} inputs",
                        vectors.len(),
                        texts.len()
                    ),
                }),
            });
        }
        for v in &vectors {
            self.check_dimensions(v)?;
        }
        Ok(vectors)
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        let expected = self.embedder.dimensions();
        if vector.len() != expected {
            return Err(DecisionError::EmbeddingService {
                source: Box::new(DecisionError::Embedding {
                    message: format!(
                        "expected {} dimensions, provider returned {}",
                        expected,
                        vector.len()
                    ),
                }),
            });
        }
        Ok(())
    }
}

fn wrap_service_error(err: DecisionError) -> DecisionError {
    match err {
        DecisionError::Cancelled { .. } => err,
        other => DecisionError::EmbeddingService {
            source: Box::new(other),
        },
    }
}

// Factory function to create embedder based on configuration
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let system = &config.system;
    let key = config.runtime.openai_api_key.as_deref().unwrap_or("");
    let is_placeholder = |s: &str| {
        let t = s.trim();
        t.is_empty()
            || t.contains("${")
            || t.eq_ignore_ascii_case("your-api-key-here")
            || t.eq_ignore_ascii_case("changeme")
    };

    match system.embedding_provider.as_str() {
        "openai" if !is_placeholder(key) => {
            info!(
                "Using OpenAI embeddings (model={}, dim={})",
                system.embedding_model, system.embedding_dimensions
            );
            return Ok(Arc::new(OpenAIEmbedder::new(
                system.embedding_base_url.clone(),
                key.to_string(),
                system.embedding_model.clone(),
                system.embedding_dimensions,
            )?));
        }
        "openai" | "fake" => {}
        other => {
            return Err(DecisionError::Config {
                message: format!("Unknown embedding provider '{}'", other),
            });
        }
    }

    if config.runtime.embed_strict {
        return Err(DecisionError::Config {
            message: "No embedding provider configured; set OPENAI_API_KEY".to_string(),
        });
    }

    let fake = FakeEmbedder::new(Some(system.embedding_dimensions));
    info!(
        "Using FakeEmbedder (deterministic) with {} dimensions",
        fake.dimensions()
    );
    Ok(Arc::new(fake))
}

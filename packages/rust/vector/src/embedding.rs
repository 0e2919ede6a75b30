//! Embedding generation.
//!
//! [`Embedder`] is the seam between the pipeline and whichever model
//! produces vectors. [`HttpEmbedder`] talks to an OpenAI-compatible
//! embeddings endpoint; [`HashEmbedder`] is a deterministic local
//! fallback used for offline mode and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use sitekb_shared::{EmbeddingSection, Result, SiteKbError};

/// Inputs per request to a remote embedding endpoint.
const HTTP_BATCH_SIZE: usize = 100;

/// Produces fixed-dimension embedding vectors for text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Dimension of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| SiteKbError::Embedding("empty embedding response".into()))
    }
}

// ---------------------------------------------------------------------------
// HttpEmbedder
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
    index: usize,
}

/// Client for an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
}

impl HttpEmbedder {
    /// Build from the `[embedding]` config section. The API key is read
    /// from the env var the config names; it is optional so local
    /// endpoints without auth keep working.
    pub fn from_config(config: &EmbeddingSection) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| SiteKbError::config("no embedding endpoint configured"))?;
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            dimension: config.dimension,
        })
    }

    async fn request_batch(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.endpoint);
        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SiteKbError::Embedding(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SiteKbError::Embedding(format!(
                "embedding endpoint returned HTTP {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| SiteKbError::Embedding(format!("invalid response: {e}")))?;

        if parsed.data.len() != input.len() {
            return Err(SiteKbError::Embedding(format!(
                "expected {} embeddings, got {}",
                input.len(),
                parsed.data.len()
            )));
        }

        // Responses may arrive out of order; restore input order.
        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);

        let mut vectors = Vec::with_capacity(items.len());
        for item in items {
            if item.embedding.len() != self.dimension {
                return Err(SiteKbError::Embedding(format!(
                    "expected dimension {}, got {}",
                    self.dimension,
                    item.embedding.len()
                )));
            }
            vectors.push(item.embedding);
        }

        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(HTTP_BATCH_SIZE) {
            debug!(batch_len = batch.len(), "requesting embeddings");
            vectors.extend(self.request_batch(batch).await?);
        }
        Ok(vectors)
    }
}

// ---------------------------------------------------------------------------
// HashEmbedder
// ---------------------------------------------------------------------------

/// Deterministic token-bucket embedder.
///
/// Each token is hashed into one of `dimension` buckets; the bucket
/// counts are L2-normalized. Identical texts always embed to identical
/// vectors, and texts sharing tokens land near each other, which is
/// enough signal for offline use and tests.
pub struct HashEmbedder {
    dimension: usize,
    token_pattern: regex::Regex,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            token_pattern: regex::Regex::new(r"[a-z0-9]+").expect("static pattern"),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        for token in self.token_pattern.find_iter(&lowered) {
            let digest = Sha256::digest(token.as_str().as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_be_bytes(bytes) % self.dimension as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

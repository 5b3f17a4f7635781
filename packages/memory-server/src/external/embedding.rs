//! Embedding adapter: remote API/router backend, or a deterministic local
//! hashing fallback when no backend is configured or the remote call fails.

use memory_palace_core::{EmbeddingBackend, EmbeddingConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingError {
    /// The configured backend returned an error or timed out; callers map
    /// this to `degrade_reasons: [embedding_request_failed]`, never a hard
    /// failure.
    RequestFailed,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Produces an embedding vector for a piece of text.
pub struct EmbeddingAdapter {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl EmbeddingAdapter {
    #[must_use]
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.config.dim
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !matches!(self.config.backend, EmbeddingBackend::None)
    }

    /// Embeds `text`. Never panics and never blocks indefinitely: remote
    /// backends are called with the caller-supplied timeout. A remote
    /// failure is reported to the caller as `Err` so the retrieval pipeline
    /// can record an `embedding_request_failed` degrade reason and downgrade
    /// the search mode accordingly, rather than silently substituting a
    /// different embedding space.
    pub async fn embed(&self, text: &str, timeout: std::time::Duration) -> Result<Vec<f32>, EmbeddingError> {
        match self.config.backend {
            EmbeddingBackend::None => Err(EmbeddingError::RequestFailed),
            EmbeddingBackend::Hash => Ok(hash_embed(text, self.config.dim)),
            EmbeddingBackend::Router | EmbeddingBackend::Api => self.remote_embed(text, timeout).await,
        }
    }

    async fn remote_embed(&self, text: &str, timeout: std::time::Duration) -> Result<Vec<f32>, EmbeddingError> {
        let base = self.config.api_base.as_deref().ok_or(EmbeddingError::RequestFailed)?;
        let model = self.config.model.as_deref().unwrap_or("default");
        let mut request = self
            .client
            .post(format!("{base}/embeddings"))
            .timeout(timeout)
            .json(&EmbeddingRequest { model, input: text });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|_| EmbeddingError::RequestFailed)?
            .error_for_status()
            .map_err(|_| EmbeddingError::RequestFailed)?
            .json::<EmbeddingResponse>()
            .await
            .map_err(|_| EmbeddingError::RequestFailed)?;
        Ok(response.embedding)
    }
}

/// Deterministic bag-of-hashed-tokens embedding: each lowercase token
/// contributes +1 to the bucket `blake3(token) % dim`, and the result is
/// L2-normalized. Stable across runs and across backends falling back, which
/// is what the Write Guard's semantic-match ladder needs.
#[must_use]
pub fn hash_embed(text: &str, dim: usize) -> Vec<f32> {
    let mut buckets = vec![0.0_f32; dim.max(1)];
    for token in text.to_lowercase().split_whitespace() {
        let hash = blake3::hash(token.as_bytes());
        let bucket = u32::from_le_bytes(hash.as_bytes()[0..4].try_into().unwrap()) as usize % buckets.len();
        buckets[bucket] += 1.0;
    }
    let norm = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for b in &mut buckets {
            *b /= norm;
        }
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embed_is_deterministic() {
        let a = hash_embed("hello world", 64);
        let b = hash_embed("hello world", 64);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_embed_is_unit_normalized() {
        let v = hash_embed("some reasonably long sentence of tokens", 32);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5 || norm == 0.0);
    }

    #[tokio::test]
    async fn none_backend_is_disabled() {
        let adapter = EmbeddingAdapter::new(EmbeddingConfig {
            backend: EmbeddingBackend::None,
            ..EmbeddingConfig::default()
        });
        assert!(!adapter.is_enabled());
        assert!(adapter
            .embed("x", std::time::Duration::from_millis(10))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn hash_backend_always_succeeds() {
        let adapter = EmbeddingAdapter::new(EmbeddingConfig::default());
        let v = adapter.embed("test", std::time::Duration::from_millis(10)).await.unwrap();
        assert_eq!(v.len(), adapter.dim());
    }
}

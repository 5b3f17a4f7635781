//! Rerank adapter: optional remote cross-encoder-style scoring of a
//! candidate set against the query. Degrades to "no rerank" on any failure.

use memory_palace_core::RerankConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RerankError;

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [&'a str],
}

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

pub struct RerankAdapter {
    config: RerankConfig,
    client: reqwest::Client,
}

impl RerankAdapter {
    #[must_use]
    pub fn new(config: RerankConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Scores each of `documents` against `query`. Returns one score per
    /// document, same order as input. `Err` means the caller should skip
    /// the rerank stage and append `reranker_request_failed`.
    pub async fn rerank(
        &self,
        query: &str,
        documents: &[&str],
        timeout: std::time::Duration,
    ) -> Result<Vec<f32>, RerankError> {
        let base = self.config.api_base.as_deref().ok_or(RerankError)?;
        let model = self.config.model.as_deref().unwrap_or("default");
        let mut request = self
            .client
            .post(format!("{base}/rerank"))
            .timeout(timeout)
            .json(&RerankRequest { model, query, documents });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|_| RerankError)?
            .error_for_status()
            .map_err(|_| RerankError)?
            .json::<RerankResponse>()
            .await
            .map_err(|_| RerankError)?;
        if response.scores.len() != documents.len() {
            return Err(RerankError);
        }
        Ok(response.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_backend_fails_fast() {
        let adapter = RerankAdapter::new(RerankConfig::default());
        let result = adapter
            .rerank("q", &["a", "b"], std::time::Duration::from_millis(10))
            .await;
        assert!(result.is_err());
    }
}

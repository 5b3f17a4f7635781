//! LLM adapter: pluggable classifier for Write Guard arbitration, and a
//! gist-generation call for `compact_context`. Both degrade to a
//! deterministic local fallback rather than failing the caller.
//!
//! Per the design notes, LLM arbitration is modeled as a uniform
//! `Classify(candidate, proposal) -> Verdict` interface behind the
//! [`LlmClassifier`] trait, so tests substitute a stub instead of a live
//! endpoint.

use async_trait::async_trait;
use memory_palace_core::WriteGuardLlmConfig;
use serde::{Deserialize, Serialize};

use crate::guard::GuardAction;

/// The LLM's verdict on whether a proposal supersedes, duplicates, or is
/// unrelated to a candidate memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub action: GuardAction,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlmError;

/// Uniform classification interface so the Write Guard's arbitration stage
/// doesn't care whether it's talking to a live endpoint or a test stub.
#[async_trait]
pub trait LlmClassifier: Send + Sync {
    async fn classify(
        &self,
        candidate_content: &str,
        proposal_content: &str,
        timeout: std::time::Duration,
    ) -> Result<Verdict, LlmError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    action: String,
    reason: String,
}

/// Remote chat-completion-backed classifier and gist generator.
pub struct LlmAdapter {
    config: WriteGuardLlmConfig,
    client: reqwest::Client,
}

impl LlmAdapter {
    #[must_use]
    pub fn new(config: WriteGuardLlmConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Summarizes `content` into at most `max_lines` lines. Falls back to a
    /// local extractive summary (first `max_lines` sentences) on any error.
    pub async fn gist(
        &self,
        content: &str,
        max_lines: usize,
        timeout: std::time::Duration,
    ) -> (String, bool) {
        if !self.config.enabled {
            return (extractive_gist(content, max_lines), false);
        }
        match self.remote_gist(content, max_lines, timeout).await {
            Ok(text) if !text.trim().is_empty() => (text, true),
            _ => (extractive_gist(content, max_lines), false),
        }
    }

    async fn remote_gist(
        &self,
        content: &str,
        max_lines: usize,
        timeout: std::time::Duration,
    ) -> Result<String, LlmError> {
        let base = self.config.api_base.as_deref().ok_or(LlmError)?;
        let model = self.config.model.as_deref().unwrap_or("default");
        let mut request = self
            .client
            .post(format!("{base}/chat/completions"))
            .timeout(timeout)
            .json(&ChatRequest {
                model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: format!("Summarize in at most {max_lines} lines:\n{content}"),
                }],
            });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        #[derive(Deserialize)]
        struct GistResponse {
            summary: String,
        }
        let response = request
            .send()
            .await
            .map_err(|_| LlmError)?
            .error_for_status()
            .map_err(|_| LlmError)?
            .json::<GistResponse>()
            .await
            .map_err(|_| LlmError)?;
        Ok(response.summary)
    }
}

#[async_trait]
impl LlmClassifier for LlmAdapter {
    async fn classify(
        &self,
        candidate_content: &str,
        proposal_content: &str,
        timeout: std::time::Duration,
    ) -> Result<Verdict, LlmError> {
        let base = self.config.api_base.as_deref().ok_or(LlmError)?;
        let model = self.config.model.as_deref().unwrap_or("default");
        let prompt = format!(
            "Existing memory:\n{candidate_content}\n\nProposed memory:\n{proposal_content}\n\n\
             Respond with one of ADD, UPDATE, NOOP, DELETE and a short reason."
        );
        let mut request = self
            .client
            .post(format!("{base}/chat/completions"))
            .timeout(timeout)
            .json(&ChatRequest {
                model,
                messages: vec![ChatMessage { role: "user", content: prompt }],
            });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|_| LlmError)?
            .error_for_status()
            .map_err(|_| LlmError)?
            .json::<ChatResponse>()
            .await
            .map_err(|_| LlmError)?;
        let action = match response.action.to_uppercase().as_str() {
            "ADD" => GuardAction::Add,
            "UPDATE" => GuardAction::Update,
            "NOOP" => GuardAction::Noop,
            "DELETE" => GuardAction::Delete,
            _ => return Err(LlmError),
        };
        Ok(Verdict { action, reason: response.reason })
    }
}

/// First `max_lines` sentence-ish chunks of `content`, trimmed. Used when no
/// LLM is configured or the remote call fails/returns empty.
#[must_use]
pub fn extractive_gist(content: &str, max_lines: usize) -> String {
    content
        .split(['.', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(max_lines.max(1))
        .collect::<Vec<_>>()
        .join(". ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extractive_gist_takes_first_n_sentences() {
        let content = "First point. Second point. Third point. Fourth point.";
        assert_eq!(extractive_gist(content, 2), "First point. Second point");
    }

    #[tokio::test]
    async fn gist_falls_back_when_disabled() {
        let adapter = LlmAdapter::new(WriteGuardLlmConfig { enabled: false, ..WriteGuardLlmConfig::default() });
        let (text, from_llm) = adapter.gist("Alpha. Beta.", 5, std::time::Duration::from_millis(10)).await;
        assert!(!from_llm);
        assert!(text.contains("Alpha"));
    }

    #[tokio::test]
    async fn classify_without_api_base_fails() {
        let adapter = LlmAdapter::new(WriteGuardLlmConfig { enabled: true, ..WriteGuardLlmConfig::default() });
        let result = adapter
            .classify("old", "new", std::time::Duration::from_millis(10))
            .await;
        assert!(result.is_err());
    }
}

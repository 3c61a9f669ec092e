use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::types::ChatRequest;
use crate::core::errors::ApiError;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// return the provider name (e.g. "openai-compat")
    fn name(&self) -> &str;

    /// chat completion (non-streaming); the provider's completion object is
    /// returned untouched so callers can relay it verbatim
    async fn chat(&self, request: ChatRequest) -> Result<Value, ApiError>;

    /// chat completion (streaming); one value per upstream chunk, in
    /// arrival order
    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<Value, ApiError>>, ApiError>;

    /// embed a single text
    async fn embed(&self, input: &str) -> Result<Vec<f32>, ApiError>;
}

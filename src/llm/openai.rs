use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::provider::LlmProvider;
use super::types::ChatRequest;
use crate::config::LlmConfig;
use crate::core::errors::ApiError;
use crate::core::http::send_with_retry;

/// Client for an OpenAI-compatible chat/embeddings API.
///
/// The caller's `model` field is ignored; the models used are the ones this
/// provider was configured with.
#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    chat_model: String,
    embedding_model: String,
    request_timeout: Duration,
    max_retries: u32,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(
        config: &LlmConfig,
        request_timeout: Duration,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        // Only the connect timeout lives on the client; a total-request
        // timeout would abort live streams. Non-streaming calls set a
        // per-request timeout below.
        let client = Client::builder().connect_timeout(request_timeout).build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            request_timeout,
            max_retries,
            client,
        })
    }

    fn chat_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.chat_model,
            "messages": request.messages,
            "stream": stream,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(t) = request.max_tokens {
                obj.insert("max_tokens".to_string(), json!(t));
            }
            if let Some(t) = request.temperature {
                obj.insert("temperature".to_string(), json!(t));
            }
        }
        body
    }
}

fn upstream_error(status: StatusCode, body: &str) -> ApiError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v["error"]["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body.to_string()
            }
        });
    let code = parsed.as_ref().and_then(|v| match &v["error"]["code"] {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    ApiError::Upstream {
        status: status.as_u16(),
        code,
        message,
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn chat(&self, request: ChatRequest) -> Result<Value, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(&self.chat_body(&request, false));

        let response = send_with_retry(builder, self.max_retries).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(upstream_error(status, &text));
        }

        response.json().await.map_err(ApiError::transport)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
    ) -> Result<mpsc::Receiver<Result<Value, ApiError>>, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.chat_body(&request, true))
            .send()
            .await
            .map_err(ApiError::transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(upstream_error(status, &text));
        }

        let (tx, rx) = mpsc::channel(32);
        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            // SSE lines can be split across byte chunks; carry the remainder.
            let mut buf = String::new();
            while let Some(item) = stream.next().await {
                match item {
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].trim().to_string();
                            buf.drain(..=pos);
                            if line.is_empty() {
                                continue;
                            }
                            if line == "data: [DONE]" {
                                return;
                            }
                            let Some(data) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            if let Ok(chunk) = serde_json::from_str::<Value>(data) {
                                if tx.send(Ok(chunk)).await.is_err() {
                                    // receiver dropped: downstream went away,
                                    // dropping `stream` closes the upstream
                                    // connection
                                    return;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        let _ = tx.send(Err(ApiError::transport(err))).await;
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn embed(&self, input: &str) -> Result<Vec<f32>, ApiError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.embedding_model,
            "input": input,
        });
        let builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.request_timeout)
            .json(&body);

        let response = send_with_retry(builder, self.max_retries).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(upstream_error(status, &text));
        }

        let payload: Value = response.json().await.map_err(ApiError::transport)?;
        let vector: Vec<f32> = payload["data"][0]["embedding"]
            .as_array()
            .map(|vals| {
                vals.iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .unwrap_or_default();

        if vector.is_empty() {
            return Err(ApiError::Embedding(
                "embedding response contained no vector".to_string(),
            ));
        }

        Ok(vector)
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::index::{IndexRecord, RetrievedMatch, VectorIndex};
use crate::config::IndexConfig;
use crate::core::errors::ApiError;
use crate::core::http::send_with_retry;

/// Pinecone-style HTTP client against a single index host.
///
/// The index itself (dimension included) is managed externally; this client
/// only appends records and runs similarity queries.
#[derive(Clone)]
pub struct PineconeIndex {
    host: String,
    api_key: String,
    max_retries: u32,
    client: Client,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RetrievedMatch>,
}

impl PineconeIndex {
    pub fn new(
        config: &IndexConfig,
        request_timeout: Duration,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            host: config.host.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries,
            client,
        })
    }

    async fn index_error(response: reqwest::Response) -> ApiError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| {
                if text.is_empty() {
                    status.to_string()
                } else {
                    text
                }
            });
        ApiError::Upstream {
            status: status.as_u16(),
            code: None,
            message,
        }
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, namespace: &str, record: IndexRecord) -> Result<(), ApiError> {
        let url = format!("{}/vectors/upsert", self.host);
        let body = json!({
            "namespace": namespace,
            "vectors": [record],
        });
        let builder = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(&body);

        let response = send_with_retry(builder, self.max_retries).await?;
        if !response.status().is_success() {
            return Err(Self::index_error(response).await);
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedMatch>, ApiError> {
        let url = format!("{}/query", self.host);
        // Stored vectors are never needed once ranking is done, so they are
        // excluded from the response.
        let body = json!({
            "namespace": namespace,
            "topK": top_k,
            "vector": vector,
            "includeMetadata": true,
            "includeValues": false,
        });
        let builder = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(&body);

        let response = send_with_retry(builder, self.max_retries).await?;
        if !response.status().is_success() {
            return Err(Self::index_error(response).await);
        }

        let payload: QueryResponse = response.json().await.map_err(ApiError::transport)?;
        Ok(payload.matches)
    }
}

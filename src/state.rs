use std::sync::Arc;

use crate::config::Config;
use crate::llm::OpenAiProvider;
use crate::rag::{PineconeIndex, QueryPipeline};

/// Application state shared across all routes.
///
/// Clients are constructed here, once, and injected into the pipeline; no
/// component reaches for global client instances.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: Arc<QueryPipeline>,
}

impl AppState {
    pub fn initialize(config: Config) -> anyhow::Result<Arc<Self>> {
        if config.llm.api_key.is_empty() {
            tracing::warn!("llm.api_key is empty; upstream calls will be rejected");
        }
        if config.index.host.is_empty() && config.retrieval {
            tracing::warn!("index.host is empty; retrieval queries will fail");
        }

        let llm = Arc::new(OpenAiProvider::new(
            &config.llm,
            config.request_timeout(),
            config.max_retries,
        )?);
        let index = Arc::new(PineconeIndex::new(
            &config.index,
            config.request_timeout(),
            config.max_retries,
        )?);
        let pipeline = Arc::new(QueryPipeline::new(llm, index, config.retrieval));

        Ok(Arc::new(AppState { config, pipeline }))
    }
}

//! Ingestion pipeline: scrape -> embed -> upsert.
//!
//! One record per ingested page; the whole document is embedded as a single
//! chunk, so retrieval granularity is one context blob per page.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use super::scraper::Scraper;
use crate::core::errors::ApiError;
use crate::llm::LlmProvider;
use crate::rag::index::{IndexRecord, RecordMetadata, VectorIndex};
use crate::rag::pipeline::RETRIEVAL_NAMESPACE;

pub const INGEST_CATEGORY: &str = "website";

/// Record id: hex SHA-256 of the document text. Re-ingesting an unchanged
/// page overwrites the same record instead of appending a duplicate.
fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

pub struct IngestPipeline {
    scraper: Arc<dyn Scraper>,
    llm: Arc<dyn LlmProvider>,
    index: Arc<dyn VectorIndex>,
}

impl IngestPipeline {
    pub fn new(
        scraper: Arc<dyn Scraper>,
        llm: Arc<dyn LlmProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            scraper,
            llm,
            index,
        }
    }

    /// Ingests one page and returns the id of the upserted record.
    pub async fn run(&self, url: &str) -> Result<String, ApiError> {
        let page = self.scraper.scrape(url).await?;
        tracing::info!(url = %url, chars = page.markdown.len(), "scraped document");

        let vector = self.llm.embed(&page.markdown).await?;
        let id = content_hash(&page.markdown);

        let record = IndexRecord {
            id: id.clone(),
            values: vector,
            metadata: RecordMetadata {
                chunk_text: page.markdown,
                category: INGEST_CATEGORY.to_string(),
                url: page.url,
            },
        };
        self.index.upsert(RETRIEVAL_NAMESPACE, record).await?;

        tracing::info!(record_id = %id, "upserted index record");
        Ok(id)
    }
}

//! Offline ingestion: scrapes the configured support page and upserts one
//! embedded record into the vector index.

use std::sync::Arc;

use support_rag::config::Config;
use support_rag::ingest::{FirecrawlScraper, IngestPipeline};
use support_rag::llm::OpenAiProvider;
use support_rag::logging;
use support_rag::rag::PineconeIndex;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    logging::init(&config.server.log_dir);

    let scraper = Arc::new(FirecrawlScraper::new(
        &config.scraper,
        config.request_timeout(),
        config.max_retries,
    )?);
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

    let pipeline = IngestPipeline::new(scraper, llm, index);
    let url = config.scraper.target_url.clone();
    let record_id = pipeline.run(&url).await?;

    tracing::info!(record_id = %record_id, url = %url, "ingestion complete");
    Ok(())
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::ScraperConfig;
use crate::core::errors::ApiError;
use crate::core::http::send_with_retry;

/// A scraped page, reduced to main-content markdown.
#[derive(Debug, Clone)]
pub struct ScrapedPage {
    pub url: String,
    pub markdown: String,
}

#[async_trait]
pub trait Scraper: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage, ApiError>;
}

/// Client for a Firecrawl-style scraping API.
#[derive(Clone)]
pub struct FirecrawlScraper {
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: Client,
}

impl FirecrawlScraper {
    pub fn new(
        config: &ScraperConfig,
        request_timeout: Duration,
        max_retries: u32,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            max_retries,
            client,
        })
    }
}

#[async_trait]
impl Scraper for FirecrawlScraper {
    async fn scrape(&self, url: &str) -> Result<ScrapedPage, ApiError> {
        let endpoint = format!("{}/v1/scrape", self.base_url);
        let body = json!({
            "url": url,
            "formats": ["markdown"],
            "onlyMainContent": true,
        });
        let builder = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);

        let response = send_with_retry(builder, self.max_retries).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream {
                status: status.as_u16(),
                code: None,
                message: if text.is_empty() {
                    status.to_string()
                } else {
                    text
                },
            });
        }

        let payload: Value = response.json().await.map_err(ApiError::transport)?;
        if !payload["success"].as_bool().unwrap_or(false) {
            let reason = payload["error"].as_str().unwrap_or("scrape reported failure");
            return Err(ApiError::Scrape(reason.to_string()));
        }

        let markdown = payload["data"]["markdown"].as_str().unwrap_or("");
        if markdown.is_empty() {
            return Err(ApiError::Scrape(
                "scrape response contained no markdown".to_string(),
            ));
        }

        Ok(ScrapedPage {
            url: url.to_string(),
            markdown: markdown.to_string(),
        })
    }
}

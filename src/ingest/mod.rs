pub mod pipeline;
pub mod scraper;

pub use pipeline::IngestPipeline;
pub use scraper::{FirecrawlScraper, ScrapedPage, Scraper};

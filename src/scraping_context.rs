use crate::{config::ScrapingConfig, requests::RequestClient, table_scraper::TableScraper};

/// Everything a command needs to talk to the portal and read its answers.
pub struct ScrapingContext {
    pub scraping_config: ScrapingConfig,
    pub request_client: RequestClient,
    pub table_scraper: TableScraper,
}

impl ScrapingContext {
    pub fn new() -> anyhow::Result<Self> {
        let scraping_config = ScrapingConfig::new()?;
        Self::from_config(scraping_config)
    }

    pub fn from_config(scraping_config: ScrapingConfig) -> anyhow::Result<Self> {
        let request_client = RequestClient::new(&scraping_config)?;
        let table_scraper = TableScraper::new()?;
        Ok(ScrapingContext {
            scraping_config,
            request_client,
            table_scraper,
        })
    }
}

use log::debug;
use reqwest::{
    Client, ClientBuilder, Response,
    header::{HeaderMap, HeaderValue, REFERER, USER_AGENT},
};

use crate::{config::ScrapingConfig, error::FetchError, ratelimit::RateLimiter};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Where report pages come from. The harvest loop only talks to this.
#[allow(async_fn_in_trait)]
pub trait ReportSource {
    /// Establishes whatever session state the portal needs before posting.
    async fn open_session(&mut self) -> Result<(), FetchError>;

    /// Posts one report form and returns the response body.
    async fn fetch_report(&mut self, form: &[(String, String)]) -> Result<String, FetchError>;
}

pub struct RequestClient {
    client: Client,
    rate_limiter: RateLimiter,
    index_url: String,
    report_url: String,
}

impl RequestClient {
    pub fn new(config: &ScrapingConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(REFERER, HeaderValue::from_str(&config.index_url)?);

        // The portal keys the report form on the session cookie set by the index page.
        let client = ClientBuilder::new()
            .cookie_store(true)
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()?;
        let rate_limiter = RateLimiter::new(config.delay);
        Ok(Self {
            client,
            rate_limiter,
            index_url: config.index_url.clone(),
            report_url: config.report_url.clone(),
        })
    }

    fn check_status(url: &str, response: Response) -> Result<Response, FetchError> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }

    pub async fn fetch_url_body(&self, url: &str) -> Result<String, FetchError> {
        self.rate_limiter.wait_until_ready().await;
        let response = self.client.get(url).send().await?;
        let body = Self::check_status(url, response)?.text().await?;
        Ok(body)
    }

    pub async fn post_report(&self, form: &[(String, String)]) -> Result<String, FetchError> {
        // Wait (non-blocking) until the courtesy delay since the last request has passed.
        self.rate_limiter.wait_until_ready().await;

        debug!("POST {} with {} fields", self.report_url, form.len());
        let response = self.client.post(&self.report_url).form(form).send().await?;
        let body = Self::check_status(&self.report_url, response)?
            .text()
            .await?;
        Ok(body)
    }
}

impl ReportSource for RequestClient {
    async fn open_session(&mut self) -> Result<(), FetchError> {
        let index_url = self.index_url.clone();
        self.fetch_url_body(&index_url).await.map(|_| ())
    }

    async fn fetch_report(&mut self, form: &[(String, String)]) -> Result<String, FetchError> {
        self.post_report(form).await
    }
}

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, bail};
use chrono::{Datelike, Utc};
use serde::{Deserialize, de::DeserializeOwned};

use crate::dimensions::Catalog;

const ENV_PREFIX: &str = "SISVAN_";

fn default_index_url() -> String {
    "https://sisaps.saude.gov.br/sisvan/relatoriopublico/index".to_string()
}

fn default_report_url() -> String {
    "https://sisaps.saude.gov.br/sisvan/relatoriopublico/estadonutricional".to_string()
}

fn default_state_code() -> String {
    // Pernambuco
    "26".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_checkpoint_file() -> PathBuf {
    PathBuf::from("sisvan_checkpoint.json")
}

/// The env vars (prefixed with `SISVAN_`) that drive scraping.
#[derive(Debug, Deserialize)]
pub struct ScrapingEnv {
    #[serde(default = "default_index_url")]
    pub index_url: String,
    #[serde(default = "default_report_url")]
    pub report_url: String,
    #[serde(default = "default_state_code")]
    pub state_code: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: PathBuf,
    pub catalog_file: Option<PathBuf>,
    pub first_year: Option<i32>,
    pub last_year: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct ScrapingConfig {
    pub index_url: String,
    pub report_url: String,
    pub state_code: String,
    pub request_timeout: Duration,
    pub delay: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub output_dir: PathBuf,
    pub checkpoint_file: PathBuf,
    pub catalog_file: Option<PathBuf>,
    /// Most recent year; harvesting walks backwards from here.
    pub first_year: i32,
    pub last_year: i32,
}

impl ScrapingConfig {
    pub fn new() -> anyhow::Result<Self> {
        let scraping_env = ScrapingEnv::load_from_env()?;
        Self::from_env(scraping_env)
    }

    pub fn from_env(env: ScrapingEnv) -> anyhow::Result<Self> {
        let first_year = env.first_year.unwrap_or_else(|| Utc::now().year());
        let last_year = env.last_year.unwrap_or(first_year - 2);
        let config = Self {
            index_url: env.index_url,
            report_url: env.report_url,
            state_code: env.state_code,
            request_timeout: Duration::from_secs(env.request_timeout_secs),
            delay: Duration::from_millis(env.delay_ms),
            max_attempts: env.max_attempts,
            retry_backoff: Duration::from_millis(env.retry_backoff_ms),
            output_dir: env.output_dir,
            checkpoint_file: env.checkpoint_file,
            catalog_file: env.catalog_file,
            first_year,
            last_year,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            bail!("SISVAN_MAX_ATTEMPTS must be at least 1");
        }
        if self.first_year < self.last_year {
            bail!(
                "first year {} is older than last year {}; years are walked from newest to oldest",
                self.first_year,
                self.last_year
            );
        }
        if self.state_code.is_empty() || !self.state_code.bytes().all(|b| b.is_ascii_digit()) {
            bail!("state code `{}` is not a numeric IBGE UF code", self.state_code);
        }
        Ok(())
    }

    /// Applies year overrides given on the command line.
    pub fn with_years(mut self, first: Option<i32>, last: Option<i32>) -> anyhow::Result<Self> {
        if let Some(first) = first {
            self.first_year = first;
            if last.is_none() && self.last_year > first {
                self.last_year = first;
            }
        }
        if let Some(last) = last {
            self.last_year = last;
        }
        self.validate()?;
        Ok(self)
    }

    /// Newest to oldest.
    pub fn years(&self) -> Vec<i32> {
        (self.last_year..=self.first_year).rev().collect()
    }

    pub fn load_catalog(&self) -> anyhow::Result<Catalog> {
        match &self.catalog_file {
            Some(path) => Catalog::from_json_file(path)
                .with_context(|| format!("failed to load catalog {}", path.display())),
            None => Ok(Catalog::default()),
        }
    }
}

// Extension trait.
pub trait LoadFromEnv: DeserializeOwned {
    fn load_from_env() -> anyhow::Result<Self> {
        // Don't throw an error if .env file doesn't exist.
        let _ = dotenv::dotenv();
        let config = envy::prefixed(ENV_PREFIX)
            .from_env::<Self>()
            .context("failed to load env variables into config struct")?;
        Ok(config)
    }
}

impl<T: DeserializeOwned> LoadFromEnv for T {}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(vars: &[(&str, &str)]) -> ScrapingEnv {
        envy::prefixed(ENV_PREFIX)
            .from_iter(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())))
            .unwrap()
    }

    #[test]
    fn defaults_point_at_the_public_portal() {
        let config = ScrapingConfig::from_env(env_from(&[("SISVAN_FIRST_YEAR", "2025")])).unwrap();
        assert!(config.report_url.ends_with("/estadonutricional"));
        assert_eq!(config.state_code, "26");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.delay, Duration::from_secs(1));
        assert_eq!(config.retry_backoff, Duration::from_secs(2));
        assert_eq!(config.years(), vec![2025, 2024, 2023]);
    }

    #[test]
    fn overrides_are_read_from_prefixed_vars() {
        let config = ScrapingConfig::from_env(env_from(&[
            ("SISVAN_STATE_CODE", "35"),
            ("SISVAN_DELAY_MS", "0"),
            ("SISVAN_FIRST_YEAR", "2020"),
            ("SISVAN_LAST_YEAR", "2020"),
        ]))
        .unwrap();
        assert_eq!(config.state_code, "35");
        assert_eq!(config.delay, Duration::ZERO);
        assert_eq!(config.years(), vec![2020]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(ScrapingConfig::from_env(env_from(&[("SISVAN_MAX_ATTEMPTS", "0")])).is_err());
        assert!(
            ScrapingConfig::from_env(env_from(&[
                ("SISVAN_FIRST_YEAR", "2015"),
                ("SISVAN_LAST_YEAR", "2020"),
            ]))
            .is_err()
        );
        assert!(ScrapingConfig::from_env(env_from(&[("SISVAN_STATE_CODE", "PE")])).is_err());
    }

    #[test]
    fn command_line_years_override_the_env() {
        let config = ScrapingConfig::from_env(env_from(&[("SISVAN_FIRST_YEAR", "2025")]))
            .unwrap()
            .with_years(Some(2019), None)
            .unwrap();
        assert_eq!(config.years(), vec![2019]);
    }
}

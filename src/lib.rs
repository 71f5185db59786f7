mod error;
mod ratelimit;
mod record;
mod text_manipulators;

pub mod checkpoint;
pub mod config;
pub mod csv_export;
pub mod csv_tools;
pub mod dimensions;
pub mod harvest;
pub mod layout;
pub mod query;
pub mod requests;
pub mod scraping_context;
pub mod table_scraper;

pub use checkpoint::Checkpoint;
pub use config::{LoadFromEnv, ScrapingConfig};
pub use csv_export::{CsvOptions, ObservationWriter, OutputFormat};
pub use dimensions::{Catalog, Combination, LifeCycle};
pub use error::{FetchError, QueryError, TableError};
pub use harvest::{HarvestOptions, HarvestSummary, RetryPolicy, harvest};
pub use layout::ReportLayout;
pub use query::{ReportQuery, pick_combination};
pub use ratelimit::RateLimiter;
pub use record::{DimensionTags, Metric, MunicipalityRow, Observation};
pub use requests::{ReportSource, RequestClient};
pub use scraping_context::ScrapingContext;
pub use table_scraper::TableScraper;
pub use text_manipulators::{NumberError, parse_count, parse_percent};

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use log::{error, info, warn};
use tokio::time::sleep;

use crate::{
    checkpoint::Checkpoint,
    config::ScrapingConfig,
    csv_export::{CsvOptions, ObservationWriter},
    dimensions::{Catalog, LifeCycle},
    error::{FetchError, TableError},
    layout::ReportLayout,
    query::ReportQuery,
    record::{DimensionTags, MunicipalityRow, Observation},
    requests::ReportSource,
    table_scraper::TableScraper,
};

/// Fixed-backoff retry settings for portal requests.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ScrapingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    pub life_cycle: LifeCycle,
    /// Newest first.
    pub years: Vec<i32>,
    pub state_code: String,
    pub output_dir: PathBuf,
    pub file_prefix: String,
    pub checkpoint_file: PathBuf,
    /// Ignore and remove any saved checkpoint before starting.
    pub fresh: bool,
    pub retry: RetryPolicy,
    pub csv: CsvOptions,
}

impl HarvestOptions {
    pub fn from_config(config: &ScrapingConfig, life_cycle: LifeCycle, csv: CsvOptions) -> Self {
        let layout = ReportLayout::for_life_cycle(life_cycle);
        Self {
            life_cycle,
            years: config.years(),
            state_code: config.state_code.clone(),
            output_dir: config.output_dir.clone(),
            file_prefix: format!(
                "sisvan_uf{}_{}_{}",
                config.state_code,
                life_cycle.name().to_lowercase(),
                layout.slug()
            ),
            checkpoint_file: config.checkpoint_file.clone(),
            fresh: false,
            retry: RetryPolicy::from_config(config),
            csv,
        }
    }

    pub fn output_path(&self, year: i32) -> PathBuf {
        self.output_dir.join(format!("{}_{year}.csv", self.file_prefix))
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct HarvestSummary {
    /// Combinations posted to the portal in this run.
    pub requested: usize,
    /// Combinations that failed to fetch or returned no municipality rows.
    pub skipped: usize,
    pub rows_written: u64,
    pub files: Vec<PathBuf>,
}

pub async fn open_session_with_retry<S: ReportSource>(
    source: &mut S,
    retry: RetryPolicy,
) -> Result<(), FetchError> {
    let mut attempt = 1;
    loop {
        match source.open_session().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retry.max_attempts => {
                warn!(
                    "opening session failed (attempt {attempt}/{}): {e}; retrying in {:?}",
                    retry.max_attempts, retry.backoff
                );
                sleep(retry.backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn fetch_with_retry<S: ReportSource>(
    source: &mut S,
    form: &[(String, String)],
    retry: RetryPolicy,
) -> Result<String, FetchError> {
    let mut attempt = 1;
    loop {
        match source.fetch_report(form).await {
            Ok(body) => return Ok(body),
            Err(e) if attempt < retry.max_attempts => {
                warn!(
                    "request failed (attempt {attempt}/{}): {e}; retrying in {:?}",
                    retry.max_attempts, retry.backoff
                );
                sleep(retry.backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// A single report, kept raw alongside its parse result.
pub struct FetchedReport {
    pub html: String,
    pub rows: Result<Vec<MunicipalityRow>, TableError>,
}

/// Opens a session and fetches one report.
pub async fn fetch_once<S: ReportSource>(
    source: &mut S,
    scraper: &TableScraper,
    query: &ReportQuery,
    retry: RetryPolicy,
) -> anyhow::Result<FetchedReport> {
    open_session_with_retry(source, retry)
        .await
        .context("failed to open a portal session")?;
    let html = fetch_with_retry(source, &query.form_fields(), retry)
        .await
        .with_context(|| format!("failed to fetch {}", query.describe()))?;
    let rows = scraper.parse_report(&html, Some(ReportLayout::for_life_cycle(query.life_cycle)));
    Ok(FetchedReport { html, rows })
}

/// Loads the saved position, discarding it if it belongs to another run.
fn resume_point(options: &HarvestOptions, combinations: usize) -> anyhow::Result<Option<Checkpoint>> {
    if options.fresh {
        Checkpoint::clear(&options.checkpoint_file)?;
        return Ok(None);
    }
    let Some(checkpoint) = Checkpoint::load(&options.checkpoint_file)? else {
        return Ok(None);
    };
    if checkpoint.life_cycle != options.life_cycle {
        warn!(
            "ignoring checkpoint for life cycle {:?}; this run harvests {:?}",
            checkpoint.life_cycle, options.life_cycle
        );
        return Ok(None);
    }
    if checkpoint.state_code != options.state_code {
        warn!(
            "ignoring checkpoint for UF {:?}; this run harvests UF {}",
            checkpoint.state_code, options.state_code
        );
        return Ok(None);
    }
    if checkpoint.combination_count != combinations {
        warn!(
            "ignoring checkpoint taken over {} combinations; the catalog now has {combinations}",
            checkpoint.combination_count
        );
        return Ok(None);
    }
    if !options.years.contains(&checkpoint.year) || checkpoint.next_combination > combinations {
        warn!(
            "ignoring checkpoint at {} #{}: outside this run's range",
            checkpoint.year, checkpoint.next_combination
        );
        return Ok(None);
    }
    info!(
        "resuming {} from combination {} of {} ({} rows already written)",
        checkpoint.year,
        checkpoint.next_combination + 1,
        combinations,
        checkpoint.rows_written
    );
    Ok(Some(checkpoint))
}

fn discard_output(path: &Path) -> anyhow::Result<()> {
    fs::remove_file(path).with_context(|| format!("failed to remove empty {}", path.display()))
}

/// Walks every year and combination, appending tagged rows to one CSV per
/// year and saving the position after each combination.
pub async fn harvest<S: ReportSource>(
    source: &mut S,
    scraper: &TableScraper,
    catalog: &Catalog,
    options: &HarvestOptions,
) -> anyhow::Result<HarvestSummary> {
    let life_cycle = options.life_cycle;
    let layout = ReportLayout::for_life_cycle(life_cycle);
    let combinations = catalog.combinations(life_cycle);
    let total = combinations.len();
    let resume = resume_point(options, total)?;

    fs::create_dir_all(&options.output_dir)
        .with_context(|| format!("failed to create {}", options.output_dir.display()))?;

    let mut summary = HarvestSummary::default();
    for &year in &options.years {
        let (start, mut checkpoint) = match &resume {
            Some(cp) if year > cp.year => {
                info!("{year} was completed in a previous run");
                continue;
            }
            Some(cp) if year == cp.year => (cp.next_combination, cp.clone()),
            _ => (0, Checkpoint::new(life_cycle, &options.state_code, year, total)),
        };
        if start >= total {
            info!("{year} was completed in a previous run");
            continue;
        }

        info!("harvesting {year}: {} combinations of {}", total - start, life_cycle.name());
        open_session_with_retry(source, options.retry)
            .await
            .with_context(|| format!("failed to open a portal session for {year}"))?;

        let path = options.output_path(year);
        let mut writer = if start > 0 {
            ObservationWriter::append(&path, layout, true, options.csv)?
        } else {
            ObservationWriter::create(&path, layout, true, options.csv)?
        };

        for (index, combination) in combinations.iter().enumerate().skip(start) {
            let query =
                ReportQuery::for_combination(year, &options.state_code, life_cycle, combination);
            info!("[{}/{total}] {}", index + 1, query.describe());
            summary.requested += 1;

            let rows = match fetch_with_retry(source, &query.form_fields(), options.retry).await {
                Ok(html) => match scraper.parse_report(&html, Some(layout)) {
                    Ok(rows) => rows,
                    Err(e) => {
                        warn!("no data for {}: {e}", query.describe());
                        Vec::new()
                    }
                },
                Err(e) => {
                    error!("giving up on {}: {e}", query.describe());
                    Vec::new()
                }
            };
            if rows.is_empty() {
                summary.skipped += 1;
            }

            let tags = DimensionTags::new(year, life_cycle, combination);
            let count = rows.len() as u64;
            for row in rows {
                writer.write(&Observation {
                    tags: tags.clone(),
                    row,
                })?;
            }
            // Rows must be on disk before the checkpoint moves past them.
            writer.flush()?;
            checkpoint.advance(index + 1, count);
            checkpoint.save(&options.checkpoint_file)?;
        }

        let written = writer.rows_written();
        drop(writer);
        summary.rows_written += written;
        if written == 0 && start == 0 {
            warn!("{year} produced no rows; not keeping {}", path.display());
            discard_output(&path)?;
        } else {
            info!("{year}: {written} rows written to {}", path.display());
            summary.files.push(path);
        }
    }

    Checkpoint::clear(&options.checkpoint_file)?;
    info!(
        "harvest finished: {} requested, {} skipped, {} rows",
        summary.requested, summary.skipped, summary.rows_written
    );
    Ok(summary)
}

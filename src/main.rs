use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use clap::{ArgGroup, Args, Parser, Subcommand};
use dotenv::dotenv;
use log::{LevelFilter, error, info, warn};
use rayon::prelude::*;
use sisvan_scraper::{
    CsvOptions, DimensionTags, HarvestOptions, LifeCycle, MunicipalityRow, Observation,
    ObservationWriter, OutputFormat, ReportLayout, ReportQuery, RetryPolicy, ScrapingConfig,
    ScrapingContext, TableScraper, csv_tools, harvest,
    harvest::fetch_once,
    pick_combination,
};

#[derive(Parser)]
#[command(name = "sisvan-scraper")]
#[command(about = "Harvests SISVAN nutritional-status reports into CSV", long_about = None)]
struct Cli {
    /// CSV flavour of every file written.
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::PowerBi)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk every year and dimension combination, resuming from the checkpoint.
    Harvest {
        #[arg(long, value_enum, default_value_t = LifeCycle::Child)]
        life_cycle: LifeCycle,
        /// Most recent year to harvest.
        #[arg(long)]
        from: Option<i32>,
        /// Oldest year to harvest.
        #[arg(long)]
        to: Option<i32>,
        /// Discard any saved checkpoint.
        #[arg(long, default_value_t = false)]
        fresh: bool,
    },
    /// Fetch a single report.
    Fetch(FetchArgs),
    /// Convert saved report pages to CSV.
    Parse {
        #[arg(required = true)]
        html: Vec<PathBuf>,
        #[arg(short, long, default_value = "sisvan_parsed.csv")]
        output: PathBuf,
        #[arg(long, value_enum)]
        layout: Option<ReportLayout>,
    },
    /// Concatenate the CSV files of a directory.
    Merge {
        dir: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Look up municipalities in an extract.
    #[command(group(ArgGroup::new("lookup").required(true).args(["list", "name"])))]
    Query {
        csv: PathBuf,
        #[arg(long)]
        list: bool,
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove total and placeholder rows from an extract.
    Clean { csv: PathBuf },
    /// Compare two extracts municipality by municipality.
    Compare { left: PathBuf, right: PathBuf },
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long)]
    year: Option<i32>,
    #[arg(long, value_enum, default_value_t = LifeCycle::Child)]
    life_cycle: LifeCycle,
    /// IBGE code of one municipality; all of them when omitted.
    #[arg(long)]
    municipality: Option<String>,
    #[arg(long)]
    race: Option<String>,
    #[arg(long)]
    sex: Option<String>,
    /// Age band code from the catalog.
    #[arg(long)]
    age_band: Option<String>,
    /// Months to include (1-12); all months when omitted.
    #[arg(long, value_delimiter = ',')]
    months: Vec<u32>,
    /// Keep the raw response for later `parse` runs.
    #[arg(long)]
    save_html: Option<PathBuf>,
    #[arg(short, long)]
    output: Option<PathBuf>,
}

async fn run_harvest(
    life_cycle: LifeCycle,
    from: Option<i32>,
    to: Option<i32>,
    fresh: bool,
    csv: CsvOptions,
) -> anyhow::Result<()> {
    let config = ScrapingConfig::new()?.with_years(from, to)?;
    let catalog = config.load_catalog()?;
    let mut context = ScrapingContext::from_config(config)?;

    let mut options = HarvestOptions::from_config(&context.scraping_config, life_cycle, csv);
    options.fresh = fresh;
    info!(
        "harvesting {} for UF {} over {:?}, {} combinations per year",
        life_cycle.name(),
        options.state_code,
        options.years,
        catalog.combination_count(life_cycle)
    );

    let summary = harvest(
        &mut context.request_client,
        &context.table_scraper,
        &catalog,
        &options,
    )
    .await
    .with_context(|| {
        format!(
            "harvest stopped; rerun to resume from {}",
            options.checkpoint_file.display()
        )
    })?;

    for file in &summary.files {
        println!("{}", file.display());
    }
    if summary.skipped > 0 {
        warn!("{} of {} combinations had no data", summary.skipped, summary.requested);
    }
    Ok(())
}

async fn run_fetch(args: FetchArgs, csv: CsvOptions) -> anyhow::Result<()> {
    let FetchArgs {
        year,
        life_cycle,
        municipality,
        race,
        sex,
        age_band,
        months,
        save_html,
        output,
    } = args;
    let config = ScrapingConfig::new()?.with_years(year, year)?;
    let catalog = config.load_catalog()?;
    let year = config.first_year;
    let combination = pick_combination(
        &catalog,
        life_cycle,
        race.as_deref(),
        sex.as_deref(),
        age_band.as_deref(),
    )?;

    let mut query = match &combination {
        Some(combination) => {
            ReportQuery::for_combination(year, &config.state_code, life_cycle, combination)
        }
        None => ReportQuery::new(year, &config.state_code, life_cycle),
    };
    if let Some(code) = &municipality {
        query = query.with_municipality(code);
    }
    query = query.with_months(&months);

    let retry = RetryPolicy::from_config(&config);
    let mut context = ScrapingContext::from_config(config)?;
    info!("fetching {}", query.describe());
    let report = fetch_once(
        &mut context.request_client,
        &context.table_scraper,
        &query,
        retry,
    )
    .await?;

    if let Some(path) = &save_html {
        fs::write(path, &report.html)
            .with_context(|| format!("failed to save response to {}", path.display()))?;
        info!("response saved to {}", path.display());
    }
    let rows = report.rows?;
    for row in &rows {
        println!(
            "{} {:<32} total {}",
            row.ibge_code,
            row.municipality,
            row.total.map(|t| t.to_string()).unwrap_or_else(|| "-".into())
        );
    }

    let layout = ReportLayout::for_life_cycle(life_cycle);
    let output = output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "sisvan_uf{}_{}_{}_{year}.csv",
            query.state_code,
            life_cycle.name().to_lowercase(),
            layout.slug()
        ))
    });
    let mut writer = ObservationWriter::create(&output, layout, combination.is_some(), csv)?;
    for row in rows {
        match &combination {
            Some(combination) => writer.write(&Observation {
                tags: DimensionTags::new(year, life_cycle, combination),
                row,
            })?,
            None => writer.write_row(&row)?,
        }
    }
    writer.flush()?;
    info!("{} rows written to {}", writer.rows_written(), output.display());
    Ok(())
}

fn run_parse(
    html: &[PathBuf],
    output: &Path,
    layout: Option<ReportLayout>,
    csv: CsvOptions,
) -> anyhow::Result<()> {
    let scraper = TableScraper::new()?;
    let parsed: Vec<(&PathBuf, anyhow::Result<Vec<MunicipalityRow>>)> = html
        .par_iter()
        .map(|path| {
            let rows = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))
                .and_then(|contents| Ok(scraper.parse_report(&contents, layout)?));
            (path, rows)
        })
        .collect();

    let mut writer: Option<ObservationWriter> = None;
    for (path, rows) in parsed {
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                error!("{}: {e:#}", path.display());
                continue;
            }
        };
        let Some(file_layout) = rows.first().map(|row| row.layout) else {
            continue;
        };
        if writer.is_none() {
            writer = Some(ObservationWriter::create(output, file_layout, false, csv)?);
        }
        let Some(writer) = writer.as_mut() else {
            continue;
        };
        if writer.layout() != file_layout {
            warn!(
                "skipping {}: {:?} report, the output holds {:?}",
                path.display(),
                file_layout,
                writer.layout()
            );
            continue;
        }
        for row in &rows {
            writer.write_row(row)?;
        }
        info!("{}: {} rows", path.display(), rows.len());
    }

    match writer {
        Some(mut writer) => {
            writer.flush()?;
            info!("{} rows written to {}", writer.rows_written(), output.display());
            Ok(())
        }
        None => bail!("none of the {} files held a report table", html.len()),
    }
}

fn run_merge(dir: &Path, output: Option<PathBuf>, csv: CsvOptions) -> anyhow::Result<()> {
    let output = output.unwrap_or_else(|| dir.join("sisvan_merged.csv"));
    let summary = csv_tools::merge_csv_dir(dir, &output, &csv)?;
    info!(
        "{} files merged ({} rows) into {}",
        summary.merged.len(),
        summary.rows,
        output.display()
    );
    for skipped in &summary.skipped {
        warn!("not merged: {}", skipped.display());
    }
    Ok(())
}

fn run_query(csv: &Path, list: bool, name: Option<String>) -> anyhow::Result<()> {
    if list {
        let municipalities = csv_tools::list_municipalities(csv)?;
        for (code, name) in &municipalities {
            println!("{code} {name}");
        }
        info!("{} municipalities", municipalities.len());
        return Ok(());
    }
    let Some(name) = name else {
        bail!("pass --list or --name");
    };
    let matches = csv_tools::find_municipality(csv, &name)?;
    if matches.rows.is_empty() {
        warn!("no municipality matching `{name}`");
        return Ok(());
    }
    for row in &matches.rows {
        for (header, value) in matches.headers.iter().zip(row.iter()) {
            println!("{header:>20}: {value}");
        }
        println!();
    }
    Ok(())
}

fn run_clean(csv: &Path) -> anyhow::Result<()> {
    let summary = csv_tools::clean_csv(csv)?;
    info!(
        "{} rows removed, {} kept; original saved as {}",
        summary.removed,
        summary.kept,
        summary.backup.display()
    );
    Ok(())
}

fn run_compare(left: &Path, right: &Path) -> anyhow::Result<()> {
    let comparison = csv_tools::compare_extracts(left, right)?;
    info!(
        "rows: {} vs {}; municipalities in common: {}",
        comparison.rows.0, comparison.rows.1, comparison.common
    );
    for column in &comparison.only_left_columns {
        warn!("column `{column}` only in {}", left.display());
    }
    for column in &comparison.only_right_columns {
        warn!("column `{column}` only in {}", right.display());
    }
    for (code, name) in &comparison.only_left {
        println!("only in {}: {code} {name}", left.display());
    }
    for (code, name) in &comparison.only_right {
        println!("only in {}: {code} {name}", right.display());
    }
    for diff in &comparison.diffs {
        println!(
            "{} {:<32} {:<16} {} vs {} (diff {})",
            diff.ibge_code,
            diff.municipality,
            diff.column,
            diff.left,
            diff.right,
            diff.left.abs_diff(diff.right)
        );
    }
    println!("Total: {} vs {}", comparison.totals.0, comparison.totals.1);
    if comparison.is_identical() {
        info!("the extracts hold the same numbers");
    } else {
        warn!("{} value differences", comparison.diffs.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let csv = CsvOptions::from(cli.format);
    match cli.command {
        Commands::Harvest {
            life_cycle,
            from,
            to,
            fresh,
        } => run_harvest(life_cycle, from, to, fresh, csv).await,
        Commands::Fetch(args) => run_fetch(args, csv).await,
        Commands::Parse {
            html,
            output,
            layout,
        } => run_parse(&html, &output, layout, csv),
        Commands::Merge { dir, output } => run_merge(&dir, output, csv),
        Commands::Query { csv: path, list, name } => run_query(&path, list, name),
        Commands::Clean { csv: path } => run_clean(&path),
        Commands::Compare { left, right } => run_compare(&left, &right),
    }
}

use std::{
    collections::{BTreeMap, BTreeSet},
    fs::{self, File},
    io::{BufWriter, Cursor, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use csv::{ByteRecord, Reader, ReaderBuilder, StringRecord, WriterBuilder};
use encoding_rs::WINDOWS_1252;
use log::{info, warn};

use crate::{
    csv_export::{CsvOptions, UTF8_BOM},
    layout::{IDENTITY_COLUMNS, MUNICIPALITY_COLUMN, TOTAL_COLUMN_NAME},
    text_manipulators::parse_count,
};

const REGION_COLUMN: &str = IDENTITY_COLUMNS[0];
const IBGE_COLUMN: &str = IDENTITY_COLUMNS[3];
const MUNICIPALITY_COLUMN_NAME: &str = IDENTITY_COLUMNS[MUNICIPALITY_COLUMN];

/// Picks `;` or `,`, whichever appears more often on the first line.
pub fn sniff_delimiter(contents: &[u8]) -> u8 {
    let first_line = contents.split(|b| *b == b'\n').next().unwrap_or_default();
    let semicolons = first_line.iter().filter(|b| **b == b';').count();
    let commas = first_line.iter().filter(|b| **b == b',').count();
    if semicolons > commas { b';' } else { b',' }
}

/// A CSV file read fully into memory as UTF-8, BOM removed.
struct LoadedCsv {
    reader: Reader<Cursor<Vec<u8>>>,
    delimiter: u8,
    had_bom: bool,
    /// The file was not UTF-8 and was decoded as Windows-1252.
    transcoded: bool,
}

/// Excel exports from pt-BR machines are Windows-1252; anything that is not
/// valid UTF-8 is read that way.
fn decode_to_utf8(contents: Vec<u8>) -> (Vec<u8>, bool) {
    if std::str::from_utf8(&contents).is_ok() {
        return (contents, false);
    }
    let (decoded, _, _) = WINDOWS_1252.decode(&contents);
    (decoded.into_owned().into_bytes(), true)
}

fn load_csv(path: &Path) -> anyhow::Result<LoadedCsv> {
    let mut contents = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let had_bom = contents.starts_with(UTF8_BOM);
    if had_bom {
        contents.drain(..UTF8_BOM.len());
    }
    let (contents, transcoded) = decode_to_utf8(contents);
    if transcoded {
        info!("{} is not UTF-8; reading it as Windows-1252", path.display());
    }
    let delimiter = sniff_delimiter(&contents);
    let reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(Cursor::new(contents));
    Ok(LoadedCsv {
        reader,
        delimiter,
        had_bom,
        transcoded,
    })
}

fn column(headers: &StringRecord, name: &str, path: &Path) -> anyhow::Result<usize> {
    match headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name)) {
        Some(index) => Ok(index),
        None => bail!("{} has no `{name}` column", path.display()),
    }
}

#[derive(Debug, Default)]
pub struct MergeSummary {
    pub merged: Vec<PathBuf>,
    /// Files left out because their header differs from the first one.
    pub skipped: Vec<PathBuf>,
    pub rows: u64,
}

/// Concatenates every `*.csv` in `dir` (sorted by name) into `output`.
///
/// Inputs are read as UTF-8, falling back to Windows-1252, so the output is
/// always UTF-8. Each input may use either delimiter; the output uses `options`.
pub fn merge_csv_dir(
    dir: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: &CsvOptions,
) -> anyhow::Result<MergeSummary> {
    let dir = dir.as_ref();
    let output = output.as_ref();
    let output_canonical = output.canonicalize().ok();

    let mut inputs: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
        })
        .filter(|path| match &output_canonical {
            Some(out) => path.canonicalize().ok().as_ref() != Some(out),
            None => true,
        })
        .collect();
    inputs.sort();
    if inputs.is_empty() {
        bail!("no CSV files in {}", dir.display());
    }

    let mut file = BufWriter::new(
        File::create(output).with_context(|| format!("failed to create {}", output.display()))?,
    );
    if options.bom {
        file.write_all(UTF8_BOM)?;
    }
    let mut writer = WriterBuilder::new()
        .delimiter(options.delimiter)
        .from_writer(file);

    let mut summary = MergeSummary::default();
    let mut expected: Option<ByteRecord> = None;
    for path in inputs {
        let mut loaded = load_csv(&path)?;
        let header = loaded.reader.byte_headers()?.clone();
        match &expected {
            None => {
                writer.write_byte_record(&header)?;
                expected = Some(header);
            }
            Some(first) if *first != header => {
                warn!("skipping {}: its header differs from the first file", path.display());
                summary.skipped.push(path);
                continue;
            }
            Some(_) => {}
        }

        let mut rows = 0;
        for record in loaded.reader.byte_records() {
            let record = record.with_context(|| format!("malformed row in {}", path.display()))?;
            writer.write_byte_record(&record)?;
            rows += 1;
        }
        info!("{}: {rows} rows", path.display());
        summary.rows += rows;
        summary.merged.push(path);
    }
    writer.flush()?;
    Ok(summary)
}

/// Distinct `(Codigo_IBGE, Municipio)` pairs, sorted by name.
pub fn list_municipalities(path: impl AsRef<Path>) -> anyhow::Result<Vec<(String, String)>> {
    let path = path.as_ref();
    let mut loaded = load_csv(path)?;
    let headers = loaded.reader.headers()?.clone();
    let ibge = column(&headers, IBGE_COLUMN, path)?;
    let name = column(&headers, MUNICIPALITY_COLUMN_NAME, path)?;

    let mut seen = BTreeSet::new();
    for record in loaded.reader.records() {
        let record = record?;
        let code = record.get(ibge).unwrap_or_default().trim();
        let municipality = record.get(name).unwrap_or_default().trim();
        if !municipality.is_empty() {
            seen.insert((municipality.to_string(), code.to_string()));
        }
    }
    Ok(seen
        .into_iter()
        .map(|(municipality, code)| (code, municipality))
        .collect())
}

#[derive(Debug)]
pub struct Matches {
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
}

/// Rows whose `Municipio` contains `needle`, ignoring case.
pub fn find_municipality(path: impl AsRef<Path>, needle: &str) -> anyhow::Result<Matches> {
    let path = path.as_ref();
    let mut loaded = load_csv(path)?;
    let headers = loaded.reader.headers()?.clone();
    let name = column(&headers, MUNICIPALITY_COLUMN_NAME, path)?;
    let needle = needle.trim().to_lowercase();

    let mut rows = Vec::new();
    for record in loaded.reader.records() {
        let record = record?;
        if record
            .get(name)
            .is_some_and(|m| m.to_lowercase().contains(&needle))
        {
            rows.push(record);
        }
    }
    Ok(Matches { headers, rows })
}

#[derive(Debug)]
pub struct CleanSummary {
    pub kept: u64,
    pub removed: u64,
    pub backup: PathBuf,
}

fn is_aggregate(record: &StringRecord, region: usize, municipality: usize) -> bool {
    let municipality = record.get(municipality).unwrap_or_default().trim();
    let region = record.get(region).unwrap_or_default().to_uppercase();
    municipality.is_empty()
        || municipality == "-"
        || municipality.to_uppercase().contains("TOTAL")
        || region.contains("TOTAL BRASIL")
}

fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}_backup.csv"))
}

/// Drops total and placeholder rows from an existing extract, in place.
///
/// The original file is copied to `<stem>_backup.csv` first. The delimiter of
/// the original is kept. The result is UTF-8, with a BOM if the original had
/// one or was Windows-1252.
pub fn clean_csv(path: impl AsRef<Path>) -> anyhow::Result<CleanSummary> {
    let path = path.as_ref();
    let mut loaded = load_csv(path)?;
    let headers = loaded.reader.headers()?.clone();
    let region = column(&headers, REGION_COLUMN, path)?;
    let municipality = column(&headers, MUNICIPALITY_COLUMN_NAME, path)?;

    let mut kept = Vec::new();
    let mut removed = 0;
    for record in loaded.reader.records() {
        let record = record.with_context(|| format!("malformed row in {}", path.display()))?;
        if is_aggregate(&record, region, municipality) {
            removed += 1;
        } else {
            kept.push(record);
        }
    }

    let backup = backup_path(path);
    fs::copy(path, &backup).with_context(|| format!("failed to back up to {}", backup.display()))?;

    let mut file = BufWriter::new(File::create(path)?);
    if loaded.had_bom || loaded.transcoded {
        file.write_all(UTF8_BOM)?;
    }
    let mut writer = WriterBuilder::new()
        .delimiter(loaded.delimiter)
        .flexible(true)
        .from_writer(file);
    writer.write_record(&headers)?;
    for record in &kept {
        writer.write_record(record)?;
    }
    writer.flush()?;

    Ok(CleanSummary {
        kept: kept.len() as u64,
        removed,
        backup,
    })
}

/// One count that differs between two extracts.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueDiff {
    pub ibge_code: String,
    pub municipality: String,
    pub column: String,
    pub left: u64,
    pub right: u64,
}

#[derive(Debug, Default)]
pub struct Comparison {
    /// Data rows in each file.
    pub rows: (usize, usize),
    pub only_left_columns: Vec<String>,
    pub only_right_columns: Vec<String>,
    /// `(Codigo_IBGE, Municipio)` present in one file only.
    pub only_left: Vec<(String, String)>,
    pub only_right: Vec<(String, String)>,
    /// Municipalities present in both files.
    pub common: usize,
    pub diffs: Vec<ValueDiff>,
    /// Sum of `Total` over every municipality row.
    pub totals: (u64, u64),
}

impl Comparison {
    pub fn is_identical(&self) -> bool {
        self.only_left.is_empty()
            && self.only_right.is_empty()
            && self.diffs.is_empty()
            && self.totals.0 == self.totals.1
    }
}

fn is_compared_column(name: &str) -> bool {
    name == TOTAL_COLUMN_NAME || name.ends_with("_Qtd")
}

struct MunicipalityCounts {
    name: String,
    /// Column name to summed count; `None` while every cell seen was missing.
    counts: BTreeMap<String, Option<u64>>,
}

/// An extract reduced to per-municipality counts.
struct Extract {
    columns: Vec<String>,
    rows: usize,
    municipalities: BTreeMap<String, MunicipalityCounts>,
    total: u64,
}

fn load_extract(path: &Path) -> anyhow::Result<Extract> {
    let mut loaded = load_csv(path)?;
    let headers = loaded.reader.headers()?.clone();
    let ibge = column(&headers, IBGE_COLUMN, path)?;
    let name = column(&headers, MUNICIPALITY_COLUMN_NAME, path)?;
    let columns: Vec<String> = headers.iter().map(|h| h.trim().to_string()).collect();
    let compared: Vec<(usize, &str)> = columns
        .iter()
        .enumerate()
        .filter(|(_, c)| is_compared_column(c))
        .map(|(i, c)| (i, c.as_str()))
        .collect();

    let mut rows = 0;
    let mut total = 0;
    let mut municipalities: BTreeMap<String, MunicipalityCounts> = BTreeMap::new();
    for record in loaded.reader.records() {
        let record = record.with_context(|| format!("malformed row in {}", path.display()))?;
        rows += 1;
        let code = record.get(ibge).unwrap_or_default().trim();
        if code.is_empty() {
            continue;
        }
        let entry = municipalities
            .entry(code.to_string())
            .or_insert_with(|| MunicipalityCounts {
                name: record.get(name).unwrap_or_default().trim().to_string(),
                counts: BTreeMap::new(),
            });
        for &(index, column) in &compared {
            let raw = record.get(index).unwrap_or_default();
            let value = match parse_count(raw) {
                Ok(value) => value,
                Err(e) => {
                    warn!("{}: {code} {column}: {e}", path.display());
                    None
                }
            };
            let sum = entry.counts.entry(column.to_string()).or_insert(None);
            if let Some(value) = value {
                *sum = Some(sum.unwrap_or(0) + value);
                if column == TOTAL_COLUMN_NAME {
                    total += value;
                }
            }
        }
    }
    Ok(Extract {
        columns,
        rows,
        municipalities,
        total,
    })
}

fn missing_from(extract: &Extract, other: &Extract) -> Vec<(String, String)> {
    extract
        .municipalities
        .iter()
        .filter(|(code, _)| !other.municipalities.contains_key(*code))
        .map(|(code, m)| (code.clone(), m.name.clone()))
        .collect()
}

/// Compares two extracts by IBGE code.
///
/// Rows sharing a code are summed first, so a per-combination harvest can be
/// checked against an unfiltered report. `Total` and every `*_Qtd` column
/// present in both files are compared; missing cells on either side are skipped.
pub fn compare_extracts(
    left: impl AsRef<Path>,
    right: impl AsRef<Path>,
) -> anyhow::Result<Comparison> {
    let left = load_extract(left.as_ref())?;
    let right = load_extract(right.as_ref())?;

    let only_in = |a: &Extract, b: &Extract| -> Vec<String> {
        a.columns
            .iter()
            .filter(|c| !b.columns.contains(c))
            .cloned()
            .collect()
    };
    let shared: Vec<&String> = left
        .columns
        .iter()
        .filter(|c| is_compared_column(c) && right.columns.contains(c))
        .collect();

    let mut comparison = Comparison {
        rows: (left.rows, right.rows),
        only_left_columns: only_in(&left, &right),
        only_right_columns: only_in(&right, &left),
        only_left: missing_from(&left, &right),
        only_right: missing_from(&right, &left),
        totals: (left.total, right.total),
        ..Comparison::default()
    };

    for (code, ours) in &left.municipalities {
        let Some(theirs) = right.municipalities.get(code) else {
            continue;
        };
        comparison.common += 1;
        for &column in &shared {
            let value = |m: &MunicipalityCounts| m.counts.get(column).copied().flatten();
            match (value(ours), value(theirs)) {
                (Some(l), Some(r)) if l != r => comparison.diffs.push(ValueDiff {
                    ibge_code: code.clone(),
                    municipality: ours.name.clone(),
                    column: column.clone(),
                    left: l,
                    right: r,
                }),
                _ => {}
            }
        }
    }
    Ok(comparison)
}

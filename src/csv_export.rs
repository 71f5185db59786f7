use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, bail};
use clap::ValueEnum;
use csv::{ReaderBuilder, StringRecord, Writer, WriterBuilder};

use crate::{
    layout::ReportLayout,
    record::{DimensionTags, MunicipalityRow, Observation},
    text_manipulators::{format_age, format_decimal},
};

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub const TAG_COLUMNS: [&str; 10] = [
    "Ano",
    "Ciclo_Vida",
    "Raca_Codigo",
    "Raca_Nome",
    "Sexo_Codigo",
    "Sexo_Nome",
    "Fase_Idade",
    "Fase_Nome",
    "Escolaridade",
    "Comunidade",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub bom: bool,
    /// Write percentages as `92,31` instead of `92.31`.
    pub decimal_comma: bool,
}

impl CsvOptions {
    /// What a pt-BR Power BI / Excel opens without an import wizard.
    pub fn power_bi() -> Self {
        Self {
            delimiter: b';',
            bom: true,
            decimal_comma: true,
        }
    }

    pub fn plain() -> Self {
        Self {
            delimiter: b',',
            bom: true,
            decimal_comma: false,
        }
    }
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self::power_bi()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    PowerBi,
    Plain,
}

impl From<OutputFormat> for CsvOptions {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::PowerBi => CsvOptions::power_bi(),
            OutputFormat::Plain => CsvOptions::plain(),
        }
    }
}

pub fn header(layout: ReportLayout, tagged: bool) -> Vec<String> {
    let mut columns = layout.column_names();
    if tagged {
        columns.extend(TAG_COLUMNS.iter().map(|c| c.to_string()));
    }
    columns
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn row_fields(row: &MunicipalityRow, options: &CsvOptions) -> Vec<String> {
    let mut fields = vec![
        row.region.clone(),
        row.state_code.clone(),
        row.state.clone(),
        row.ibge_code.clone(),
        row.municipality.clone(),
    ];
    for metric in &row.metrics {
        fields.push(optional(metric.count));
        fields.push(
            metric
                .percent
                .map(|p| format_decimal(p, options.decimal_comma))
                .unwrap_or_default(),
        );
    }
    fields.push(optional(row.total));
    fields
}

pub fn tag_fields(tags: &DimensionTags) -> Vec<String> {
    let (band_code, band_name) = match &tags.age_band {
        Some(band) => (band.code.clone(), band.name.clone()),
        None => (String::new(), String::new()),
    };
    vec![
        tags.year.to_string(),
        tags.life_cycle.name().to_string(),
        tags.race.code.clone(),
        tags.race.name.clone(),
        tags.sex.code.clone(),
        tags.sex.name.clone(),
        band_code,
        band_name,
        tags.education.code.clone(),
        tags.community.code.clone(),
    ]
}

/// Age band as a human label, e.g. `0.5-2`.
pub fn age_range_label(tags: &DimensionTags) -> String {
    tags.age_band
        .as_ref()
        .map(|b| format!("{}-{}", format_age(b.start), format_age(b.end)))
        .unwrap_or_default()
}

fn check_existing_header(path: &Path, expected: &[String], delimiter: u8) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut first_line = Vec::new();
    BufReader::new(file).read_until(b'\n', &mut first_line)?;
    let line = first_line.strip_prefix(UTF8_BOM).unwrap_or(&first_line);

    let found = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_reader(line)
        .records()
        .next()
        .transpose()?
        .unwrap_or_else(StringRecord::new);
    if !found.iter().eq(expected.iter().map(String::as_str)) {
        let separator = (delimiter as char).to_string();
        bail!(
            "refusing to append to {}: it does not start with the `{}`-delimited header `{}`",
            path.display(),
            delimiter as char,
            expected.join(separator.as_str())
        );
    }
    Ok(())
}

/// Streams report rows into one CSV file.
pub struct ObservationWriter {
    writer: Writer<File>,
    path: PathBuf,
    layout: ReportLayout,
    tagged: bool,
    options: CsvOptions,
    rows_written: u64,
}

impl ObservationWriter {
    /// Truncates `path` and writes the header.
    pub fn create(
        path: impl AsRef<Path>,
        layout: ReportLayout,
        tagged: bool,
        options: CsvOptions,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Self::from_file(file, path, true, layout, tagged, options)
    }

    /// Appends to `path`, writing the header only when the file is new or empty.
    ///
    /// An existing file must start with the header this writer would write,
    /// in the same delimiter; anything else is refused untouched.
    pub fn append(
        path: impl AsRef<Path>,
        layout: ReportLayout,
        tagged: bool,
        options: CsvOptions,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {} for appending", path.display()))?;
        let is_empty = file.metadata()?.len() == 0;
        if !is_empty {
            check_existing_header(path, &header(layout, tagged), options.delimiter)?;
        }
        Self::from_file(file, path, is_empty, layout, tagged, options)
    }

    fn from_file(
        mut file: File,
        path: &Path,
        write_header: bool,
        layout: ReportLayout,
        tagged: bool,
        options: CsvOptions,
    ) -> anyhow::Result<Self> {
        if write_header && options.bom {
            file.write_all(UTF8_BOM)?;
        }
        let mut writer = WriterBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(false)
            .from_writer(file);
        if write_header {
            writer.write_record(header(layout, tagged))?;
        }
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            layout,
            tagged,
            options,
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn layout(&self) -> ReportLayout {
        self.layout
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn check_layout(&self, row: &MunicipalityRow) -> anyhow::Result<()> {
        if row.layout != self.layout {
            bail!(
                "{} holds {:?} rows, got a {:?} row for {}",
                self.path.display(),
                self.layout,
                row.layout,
                row.municipality
            );
        }
        Ok(())
    }

    pub fn write_row(&mut self, row: &MunicipalityRow) -> anyhow::Result<()> {
        if self.tagged {
            bail!("{} expects tagged observations", self.path.display());
        }
        self.check_layout(row)?;
        self.writer.write_record(row_fields(row, &self.options))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn write(&mut self, observation: &Observation) -> anyhow::Result<()> {
        self.check_layout(&observation.row)?;
        let mut fields = row_fields(&observation.row, &self.options);
        if self.tagged {
            fields.extend(tag_fields(&observation.tags));
        }
        self.writer.write_record(fields)?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("failed to flush {}", self.path.display()))
    }
}

use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::{
    error::TableError,
    layout::{IBGE_COLUMN, IDENTITY_COLUMNS, MUNICIPALITY_COLUMN, ReportLayout},
    record::{Metric, MunicipalityRow},
    text_manipulators::{clean_cell, extract_text, parse_count, parse_percent},
};

// Guards against absurd span attributes blowing up the grid.
const MAX_SPAN: usize = 64;
const WEIGHT_FOR_AGE_PREFIX: &str = "PESO X IDADE";

/// A `<table>` as text: flattened header labels plus its body rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    WidthMismatch { found: usize },
    HeaderRow,
    TotalRow,
    InvalidIbgeCode(String),
    MissingMunicipality,
    BadNumber { column: String, raw: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    pub index: usize,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Normalized {
    pub rows: Vec<MunicipalityRow>,
    pub skipped: Vec<SkippedRow>,
}

impl Normalized {
    pub fn skipped_where(&self, predicate: impl Fn(&SkipReason) -> bool) -> usize {
        self.skipped.iter().filter(|s| predicate(&s.reason)).count()
    }
}

/// Tells municipality rows apart from aggregates.
pub struct RowFilter {
    ibge_code: Regex,
    total_label: Regex,
}

impl RowFilter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            ibge_code: Regex::new(r"^\d{6}$")?,
            total_label: Regex::new(r"(?i)total")?,
        })
    }

    /// Aggregates ("TOTAL ESTADO ...", "TOTAL BRASIL") may label any of the
    /// identity cells, not only the municipality one.
    pub fn is_total<S: AsRef<str>>(&self, identity: &[S]) -> bool {
        identity
            .iter()
            .any(|cell| self.total_label.is_match(cell.as_ref()))
    }

    pub fn is_ibge_code(&self, code: &str) -> bool {
        self.ibge_code.is_match(code)
    }
}

struct HeaderCell {
    text: String,
    colspan: usize,
    rowspan: usize,
}

fn span(cell: &ElementRef, attr: &str) -> usize {
    cell.value()
        .attr(attr)
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(1)
        .min(MAX_SPAN)
}

fn clean_label(raw: &str) -> String {
    let label = raw.replace(WEIGHT_FOR_AGE_PREFIX, "");
    let label = label.trim();
    label.strip_prefix(',').unwrap_or(label).trim().to_string()
}

/// Lays multi-level header rows out on a grid (honouring `colspan` and
/// `rowspan`) and labels each column with its deepest non-empty level.
fn flatten_headers(rows: &[Vec<HeaderCell>]) -> Vec<String> {
    let mut grid: Vec<Vec<Option<&str>>> = vec![Vec::new(); rows.len()];
    for (r, cells) in rows.iter().enumerate() {
        let mut col = 0;
        for cell in cells {
            while grid[r].get(col).is_some_and(|slot| slot.is_some()) {
                col += 1;
            }
            let last_row = (r + cell.rowspan).min(rows.len());
            for level in grid.iter_mut().take(last_row).skip(r) {
                if level.len() < col + cell.colspan {
                    level.resize(col + cell.colspan, None);
                }
                for slot in &mut level[col..col + cell.colspan] {
                    *slot = Some(cell.text.as_str());
                }
            }
            col += cell.colspan;
        }
    }

    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    (0..width)
        .map(|c| {
            let label = grid
                .iter()
                .filter_map(|level| level.get(c).copied().flatten())
                .map(clean_label)
                .filter(|l| !l.is_empty())
                .last();
            label.unwrap_or_else(|| format!("Coluna_{}", c + 1))
        })
        .collect()
}

fn same_label(cell: &str, label: &str) -> bool {
    !cell.is_empty() && cell.to_lowercase() == label.to_lowercase()
}

fn is_header_row(identity: &[String], headers: &[String]) -> bool {
    if identity[IBGE_COLUMN].to_lowercase().contains("ibge") {
        return true;
    }
    let repeats_table_header = headers.len() >= identity.len()
        && identity.iter().zip(headers).all(|(c, h)| same_label(c, h));
    let repeats_column_names = identity
        .iter()
        .zip(IDENTITY_COLUMNS)
        .all(|(c, h)| same_label(c, h));
    repeats_table_header || repeats_column_names
}

fn is_missing_name(name: &str) -> bool {
    name.is_empty() || name == "-"
}

pub struct TableScraper {
    tables: Selector,
    header_rows: Selector,
    body_rows: Selector,
    cells: Selector,
    filter: RowFilter,
}

fn selector(selector: &str) -> Result<Selector, TableError> {
    Selector::parse(selector).map_err(|e| TableError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

impl TableScraper {
    pub fn new() -> Result<Self, TableError> {
        Ok(Self {
            tables: selector("table")?,
            header_rows: selector("thead > tr")?,
            body_rows: selector("tbody > tr, tfoot > tr")?,
            cells: selector("th, td")?,
            filter: RowFilter::new()?,
        })
    }

    pub fn row_filter(&self) -> &RowFilter {
        &self.filter
    }

    pub fn extract_tables(&self, html: &str) -> Vec<RawTable> {
        let document = Html::parse_document(html);
        document
            .select(&self.tables)
            .map(|table| self.read_table(table))
            .collect()
    }

    fn header_cells(&self, row: ElementRef) -> Vec<HeaderCell> {
        row.select(&self.cells)
            .map(|cell| HeaderCell {
                text: extract_text(cell),
                colspan: span(&cell, "colspan"),
                rowspan: span(&cell, "rowspan"),
            })
            .collect()
    }

    fn read_table(&self, table: ElementRef) -> RawTable {
        let mut header_rows: Vec<Vec<HeaderCell>> = table
            .select(&self.header_rows)
            .map(|row| self.header_cells(row))
            .collect();
        let mut rows = Vec::new();

        for tr in table.select(&self.body_rows) {
            let cells: Vec<ElementRef> = tr.select(&self.cells).collect();
            if cells.is_empty() {
                continue;
            }
            if cells.iter().all(|c| c.value().name() == "th") {
                if rows.is_empty() {
                    header_rows.push(self.header_cells(tr));
                } else {
                    debug!("skipping repeated header row inside table body");
                }
                continue;
            }

            // Expanded like a spreadsheet would: a `colspan=5` label fills five cells.
            let row: Vec<String> = cells
                .iter()
                .flat_map(|cell| std::iter::repeat_n(extract_text(*cell), span(cell, "colspan")))
                .collect();
            if row.iter().all(|c| c.is_empty()) {
                continue;
            }
            rows.push(row);
        }

        RawTable {
            headers: flatten_headers(&header_rows),
            rows,
        }
    }

    /// Picks the layout matching the most frequent row width.
    pub fn detect_layout(&self, tables: &[RawTable]) -> Option<ReportLayout> {
        let mut widths: HashMap<usize, usize> = HashMap::new();
        for row in tables.iter().flat_map(|t| &t.rows) {
            *widths.entry(row.len()).or_default() += 1;
        }
        // reversed so that ties resolve to the first layout
        ReportLayout::ALL
            .into_iter()
            .rev()
            .filter_map(|layout| widths.get(&layout.width()).map(|n| (layout, *n)))
            .max_by_key(|(_, n)| *n)
            .map(|(layout, _)| layout)
    }

    pub fn normalize(&self, table: &RawTable, layout: ReportLayout) -> Normalized {
        let names = layout.column_names();
        let mut out = Normalized::default();
        for (index, cells) in table.rows.iter().enumerate() {
            match self.normalize_row(cells, &table.headers, layout, &names) {
                Ok(row) => out.rows.push(row),
                Err(reason) => {
                    debug!("row {index} skipped: {reason:?}");
                    out.skipped.push(SkippedRow { index, reason });
                }
            }
        }
        out
    }

    fn normalize_row(
        &self,
        cells: &[String],
        headers: &[String],
        layout: ReportLayout,
        names: &[String],
    ) -> Result<MunicipalityRow, SkipReason> {
        if cells.len() != layout.width() {
            return Err(SkipReason::WidthMismatch { found: cells.len() });
        }
        let identity = &cells[..IDENTITY_COLUMNS.len()];
        if is_header_row(identity, headers) {
            return Err(SkipReason::HeaderRow);
        }
        if self.filter.is_total(identity) {
            return Err(SkipReason::TotalRow);
        }
        let ibge_code = clean_cell(&cells[IBGE_COLUMN]);
        if !self.filter.is_ibge_code(&ibge_code) {
            return Err(SkipReason::InvalidIbgeCode(ibge_code));
        }
        let municipality = clean_cell(&cells[MUNICIPALITY_COLUMN]);
        if is_missing_name(&municipality) {
            return Err(SkipReason::MissingMunicipality);
        }

        let bad = |i: usize| SkipReason::BadNumber {
            column: names[i].clone(),
            raw: cells[i].clone(),
        };
        let mut metrics = Vec::with_capacity(layout.categories().len());
        for category in 0..layout.categories().len() {
            let count_at = layout.count_index(category);
            let percent_at = layout.percent_index(category);
            metrics.push(Metric {
                count: parse_count(&cells[count_at]).map_err(|_| bad(count_at))?,
                percent: parse_percent(&cells[percent_at]).map_err(|_| bad(percent_at))?,
            });
        }
        let total_at = layout.total_index();
        let total = parse_count(&cells[total_at]).map_err(|_| bad(total_at))?;

        Ok(MunicipalityRow {
            layout,
            region: clean_cell(&cells[0]),
            state_code: clean_cell(&cells[1]),
            state: clean_cell(&cells[2]),
            ibge_code,
            municipality,
            metrics,
            total,
        })
    }

    /// Extracts the municipality rows of a report page.
    ///
    /// With `layout` unset, the layout is detected from the row widths. Rows of
    /// every table on the page are concatenated in document order.
    pub fn parse_report(
        &self,
        html: &str,
        layout: Option<ReportLayout>,
    ) -> Result<Vec<MunicipalityRow>, TableError> {
        let tables = self.extract_tables(html);
        if tables.is_empty() {
            return Err(TableError::NoTables);
        }
        debug!("{} table(s) in response", tables.len());

        let layout = match layout.or_else(|| self.detect_layout(&tables)) {
            Some(layout) => layout,
            None => {
                let widths: BTreeSet<usize> =
                    tables.iter().flat_map(|t| &t.rows).map(Vec::len).collect();
                return Err(TableError::UnknownLayout {
                    widths: widths.into_iter().collect(),
                });
            }
        };

        let mut rows = Vec::new();
        let mut totals = 0;
        for table in &tables {
            let normalized = self.normalize(table, layout);
            totals += normalized.skipped_where(|r| *r == SkipReason::TotalRow);
            for skipped in &normalized.skipped {
                if let SkipReason::BadNumber { column, raw } = &skipped.reason {
                    warn!("dropping row {}: `{raw}` in {column} is not a number", skipped.index);
                }
            }
            rows.extend(normalized.rows);
        }
        debug!("{} municipality rows kept, {totals} total rows dropped", rows.len());

        if rows.is_empty() {
            return Err(TableError::NoDataRows { layout });
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraper() -> TableScraper {
        TableScraper::new().unwrap()
    }

    #[test]
    fn multi_level_headers_keep_the_deepest_label() {
        let html = r#"<table>
            <thead>
              <tr><th rowspan="2">Região</th><th colspan="2">PESO X IDADE Muito Baixo</th><th rowspan="2">Total</th></tr>
              <tr><th>Quantidade</th><th>%</th></tr>
            </thead>
            <tbody><tr><td>NORDESTE</td><td>1</td><td>2%</td><td>3</td></tr></tbody>
        </table>"#;
        let tables = scraper().extract_tables(html);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].headers, ["Região", "Quantidade", "%", "Total"]);
        assert_eq!(tables[0].rows, [["NORDESTE", "1", "2%", "3"]]);
    }

    #[test]
    fn header_prefixes_and_blank_labels_are_cleaned() {
        let html = r#"<table>
            <thead><tr><th>PESO X IDADE Muito Baixo</th><th>, Baixo</th><th></th></tr></thead>
            <tbody><tr><td>a</td><td>b</td><td>c</td></tr></tbody>
        </table>"#;
        let tables = scraper().extract_tables(html);
        assert_eq!(tables[0].headers, ["Muito Baixo", "Baixo", "Coluna_3"]);
    }

    #[test]
    fn leading_th_rows_in_body_become_headers_and_later_ones_are_dropped() {
        let html = r#"<table><tbody>
            <tr><th>UF</th><th>Total</th></tr>
            <tr><td>PE</td><td>10</td></tr>
            <tr><th>UF</th><th>Total</th></tr>
            <tr><td> </td><td></td></tr>
            <tr><td colspan="2">TOTAL</td></tr>
        </tbody></table>"#;
        let tables = scraper().extract_tables(html);
        assert_eq!(tables[0].headers, ["UF", "Total"]);
        assert_eq!(tables[0].rows, [["PE", "10"], ["TOTAL", "TOTAL"]]);
    }

    #[test]
    fn layout_detection_prefers_the_dominant_width() {
        let row = |n: usize| vec![String::new(); n];
        let tables = vec![
            RawTable {
                headers: vec![],
                rows: vec![row(2), row(18), row(18), row(14)],
            },
            RawTable {
                headers: vec![],
                rows: vec![row(2)],
            },
        ];
        assert_eq!(
            scraper().detect_layout(&tables),
            Some(ReportLayout::BodyMassIndex)
        );
        assert_eq!(
            scraper().detect_layout(&[RawTable {
                headers: vec![],
                rows: vec![row(3)]
            }]),
            None
        );
    }

    #[test]
    fn total_labels_match_any_identity_cell() {
        let filter = RowFilter::new().unwrap();
        assert!(filter.is_total(&["TOTAL BRASIL", "", "", "", ""][..]));
        assert!(filter.is_total(&["NORDESTE", "26", "PE", "", "Total Estado"][..]));
        assert!(!filter.is_total(&["NORDESTE", "26", "PE", "260010", "AFOGADOS DA INGAZEIRA"][..]));
        assert!(filter.is_ibge_code("260010"));
        assert!(!filter.is_ibge_code("2600100"));
    }

    #[test]
    fn bad_numbers_are_reported_with_their_column() {
        let mut cells: Vec<String> = ["NORDESTE", "26", "PE", "260010", "AFOGADOS"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        cells.extend(["1", "x%", "0", "-", "0", "-", "0", "-", "1"].map(String::from));
        let table = RawTable {
            headers: vec![],
            rows: vec![cells],
        };
        let normalized = scraper().normalize(&table, ReportLayout::WeightForAge);
        assert!(normalized.rows.is_empty());
        assert_eq!(
            normalized.skipped[0].reason,
            SkipReason::BadNumber {
                column: "MuitoBaixo_Perc".to_string(),
                raw: "x%".to_string()
            }
        );
    }
}

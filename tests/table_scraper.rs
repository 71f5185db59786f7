use std::fs;

use sisvan_scraper::{
    ReportLayout, TableError, TableScraper,
    table_scraper::{RawTable, SkipReason},
};

fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("cannot read {path}: {e}"))
}

#[test]
fn child_report_yields_only_municipality_rows() {
    let scraper = TableScraper::new().unwrap();
    let rows = scraper
        .parse_report(&fixture("crianca_peso_idade.html"), None)
        .unwrap();

    let names: Vec<&str> = rows.iter().map(|r| r.municipality.as_str()).collect();
    assert_eq!(names, ["AFOGADOS DA INGAZEIRA", "AFRANIO", "RECIFE"]);
    assert!(rows.iter().all(|r| r.layout == ReportLayout::WeightForAge));
    assert!(rows.iter().all(|r| r.ibge_code.len() == 6));

    let recife = &rows[2];
    assert_eq!(recife.ibge_code, "261160");
    assert_eq!(recife.region, "NORDESTE");
    assert_eq!(recife.state, "PE");
    assert_eq!(recife.total, Some(14091));
    let adequate = recife.metric("Adequado").unwrap();
    assert_eq!(adequate.count, Some(12034));
    assert_eq!(adequate.percent, Some(85.4));
    assert_eq!(recife.metric("Elevado").unwrap().count, Some(1527));
}

#[test]
fn missing_values_stay_absent() {
    let scraper = TableScraper::new().unwrap();
    let rows = scraper
        .parse_report(&fixture("crianca_peso_idade.html"), Some(ReportLayout::WeightForAge))
        .unwrap();
    let afranio = rows.iter().find(|r| r.ibge_code == "260020").unwrap();
    let very_low = afranio.metric("MuitoBaixo").unwrap();
    assert_eq!(very_low.count, None);
    assert_eq!(very_low.percent, None);
    assert_eq!(afranio.metric("Baixo").unwrap().count, Some(15));
}

#[test]
fn skipped_rows_are_classified() {
    let scraper = TableScraper::new().unwrap();
    let tables = scraper.extract_tables(&fixture("crianca_peso_idade.html"));
    assert_eq!(tables.len(), 2);

    let report = &tables[1];
    assert_eq!(report.headers.len(), 14);
    assert_eq!(report.headers[3], "Código IBGE");
    assert_eq!(report.headers[6], "%");

    let normalized = scraper.normalize(report, ReportLayout::WeightForAge);
    assert_eq!(normalized.rows.len(), 3);
    assert_eq!(normalized.skipped_where(|r| *r == SkipReason::HeaderRow), 1);
    assert_eq!(normalized.skipped_where(|r| *r == SkipReason::TotalRow), 2);
    assert_eq!(
        normalized.skipped_where(|r| *r == SkipReason::InvalidIbgeCode("2600X".into())),
        1
    );

    let filters = scraper.normalize(&tables[0], ReportLayout::WeightForAge);
    assert!(filters.rows.is_empty());
    assert_eq!(
        filters.skipped_where(|r| matches!(r, SkipReason::WidthMismatch { found: 2 })),
        2
    );
}

#[test]
fn adult_report_is_detected_by_width() {
    let scraper = TableScraper::new().unwrap();
    let html = fixture("adulto_imc.html");
    let tables = scraper.extract_tables(&html);
    assert_eq!(scraper.detect_layout(&tables), Some(ReportLayout::BodyMassIndex));
    // header row inside tbody becomes the table header
    assert_eq!(tables[0].headers[5], "Baixo Peso");

    let rows = scraper.parse_report(&html, None).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].municipality, "ABREU E LIMA");
    assert_eq!(rows[0].total, Some(490));
    assert_eq!(rows[0].metrics.len(), 6);
    assert_eq!(rows[0].metric("ObesidadeIII").unwrap().percent, Some(4.08));
    assert_eq!(rows[1].total, Some(250));
    assert_eq!(rows[1].metric("Sobrepeso").unwrap().percent, Some(36.0));
}

#[test]
fn forcing_the_wrong_layout_finds_no_rows() {
    let scraper = TableScraper::new().unwrap();
    let err = scraper
        .parse_report(&fixture("adulto_imc.html"), Some(ReportLayout::WeightForAge))
        .unwrap_err();
    assert!(matches!(
        err,
        TableError::NoDataRows {
            layout: ReportLayout::WeightForAge
        }
    ));
}

#[test]
fn pages_without_tables_are_errors() {
    let scraper = TableScraper::new().unwrap();
    let err = scraper
        .parse_report("<html><body><p>Nenhum registro encontrado</p></body></html>", None)
        .unwrap_err();
    assert!(matches!(err, TableError::NoTables));

    let err = scraper
        .parse_report("<table><tr><td>a</td><td>b</td></tr></table>", None)
        .unwrap_err();
    assert!(matches!(err, TableError::UnknownLayout { .. }));
}

#[test]
fn multi_level_headers_use_the_deepest_label() {
    let scraper = TableScraper::new().unwrap();
    let tables = scraper.extract_tables(
        r#"<table>
            <thead>
              <tr><th rowspan="2">Município</th><th colspan="2">PESO X IDADE, Peso Adequado</th></tr>
              <tr><th>Quantidade</th><th></th></tr>
            </thead>
            <tbody><tr><td>RECIFE</td><td>1</td><td>2</td></tr></tbody>
          </table>"#,
    );
    assert_eq!(
        tables,
        vec![RawTable {
            headers: vec![
                "Município".to_string(),
                "Quantidade".to_string(),
                "Peso Adequado".to_string()
            ],
            rows: vec![vec!["RECIFE".to_string(), "1".to_string(), "2".to_string()]],
        }]
    );
}

use std::fs;

use sisvan_scraper::{CsvOptions, csv_tools};

const BOM: &str = "\u{feff}";

fn write(path: &std::path::Path, contents: &str) {
    fs::write(path, contents).unwrap();
}

#[test]
fn merge_concatenates_matching_files_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("b_2023.csv"),
        &format!("{BOM}Regiao;Codigo_IBGE;Municipio\nNORDESTE;260010;AFOGADOS DA INGAZEIRA\n"),
    );
    write(
        &dir.path().join("a_2024.csv"),
        "Regiao,Codigo_IBGE,Municipio\nNORDESTE,261160,RECIFE\nNORDESTE,260020,AFRANIO\n",
    );
    write(
        &dir.path().join("c_other.csv"),
        "Ano;Total\n2024;10\n",
    );
    write(&dir.path().join("notes.txt"), "not a csv");

    let output = dir.path().join("merged.csv");
    // a stale output from an earlier merge must not be read back in
    write(&output, "Regiao,Codigo_IBGE,Municipio\nX,999999,STALE\n");

    let summary = csv_tools::merge_csv_dir(dir.path(), &output, &CsvOptions::power_bi()).unwrap();
    assert_eq!(summary.merged.len(), 2);
    assert_eq!(summary.skipped, vec![dir.path().join("c_other.csv")]);
    assert_eq!(summary.rows, 3);

    let text = fs::read_to_string(&output).unwrap();
    assert_eq!(
        text,
        format!(
            "{BOM}Regiao;Codigo_IBGE;Municipio\n\
             NORDESTE;261160;RECIFE\n\
             NORDESTE;260020;AFRANIO\n\
             NORDESTE;260010;AFOGADOS DA INGAZEIRA\n"
        )
    );
}

#[test]
fn municipalities_are_listed_once_sorted_by_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pe.csv");
    write(
        &path,
        &format!(
            "{BOM}Regiao;Codigo_UF;UF;Codigo_IBGE;Municipio;Total\n\
             NORDESTE;26;PE;261160;RECIFE;14091\n\
             NORDESTE;26;PE;260010;AFOGADOS DA INGAZEIRA;960\n\
             NORDESTE;26;PE;261160;RECIFE;13002\n"
        ),
    );

    let listed = csv_tools::list_municipalities(&path).unwrap();
    assert_eq!(
        listed,
        vec![
            ("260010".to_string(), "AFOGADOS DA INGAZEIRA".to_string()),
            ("261160".to_string(), "RECIFE".to_string()),
        ]
    );

    let found = csv_tools::find_municipality(&path, "recif").unwrap();
    assert_eq!(found.rows.len(), 2);
    assert_eq!(&found.headers[5], "Total");
    assert_eq!(&found.rows[1][5], "13002");
    assert!(csv_tools::find_municipality(&path, "olinda").unwrap().rows.is_empty());
}

#[test]
fn lookups_need_a_municipality_column() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("odd.csv");
    write(&path, "a,b\n1,2\n");
    assert!(csv_tools::list_municipalities(&path).is_err());
}

#[test]
fn clean_removes_aggregates_and_keeps_a_backup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pe_2024.csv");
    let original = format!(
        "{BOM}Regiao;Codigo_UF;UF;Codigo_IBGE;Municipio;Total\n\
         NORDESTE;26;PE;261160;RECIFE;14091\n\
         NORDESTE;26;PE;;TOTAL ESTADO PERNAMBUCO;15491\n\
         TOTAL BRASIL;;;;BRASIL;4911798\n\
         NORDESTE;26;PE;260000;-;0\n\
         NORDESTE;26;PE;260001;;0\n\
         NORDESTE;26;PE;260020;AFRANIO;440\n"
    );
    write(&path, &original);

    let summary = csv_tools::clean_csv(&path).unwrap();
    assert_eq!(summary.kept, 2);
    assert_eq!(summary.removed, 4);
    assert_eq!(summary.backup, dir.path().join("pe_2024_backup.csv"));
    assert_eq!(fs::read_to_string(&summary.backup).unwrap(), original);

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        format!(
            "{BOM}Regiao;Codigo_UF;UF;Codigo_IBGE;Municipio;Total\n\
             NORDESTE;26;PE;261160;RECIFE;14091\n\
             NORDESTE;26;PE;260020;AFRANIO;440\n"
        )
    );
}

#[test]
fn latin1_inputs_are_merged_and_cleaned_as_utf8() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path().join("a_2024.csv"),
        "Regiao;Codigo_IBGE;Municipio\nNORDESTE;261160;RECIFE\n",
    );
    fs::write(
        dir.path().join("b_2023.csv"),
        b"Regiao;Codigo_IBGE;Municipio\nNORDESTE;260020;AFR\xC2NIO\nNORDESTE;260001;\n",
    )
    .unwrap();

    let output = dir.path().join("merged").with_extension("out");
    let summary = csv_tools::merge_csv_dir(dir.path(), &output, &CsvOptions::power_bi()).unwrap();
    assert_eq!(summary.merged.len(), 2);
    let text = String::from_utf8(fs::read(&output).unwrap()).unwrap();
    assert!(text.contains("NORDESTE;260020;AFRÂNIO\n"));
    assert_eq!(
        csv_tools::list_municipalities(&output).unwrap(),
        vec![
            ("260020".to_string(), "AFRÂNIO".to_string()),
            ("261160".to_string(), "RECIFE".to_string()),
        ]
    );

    let latin1 = dir.path().join("b_2023.csv");
    let summary = csv_tools::clean_csv(&latin1).unwrap();
    assert_eq!((summary.kept, summary.removed), (1, 1));
    assert_eq!(
        fs::read_to_string(&latin1).unwrap(),
        format!("{BOM}Regiao;Codigo_IBGE;Municipio\nNORDESTE;260020;AFRÂNIO\n")
    );
}

#[test]
fn comparison_sums_combinations_and_reports_differences() {
    let dir = tempfile::tempdir().unwrap();
    let harvested = dir.path().join("harvest.csv");
    let general = dir.path().join("general.csv");
    // two combinations of the same municipality, as a harvest writes them
    write(
        &harvested,
        &format!(
            "{BOM}Regiao;Codigo_IBGE;Municipio;Adequado_Qtd;Adequado_Perc;Total;Sexo_Codigo\n\
             NORDESTE;261160;RECIFE;6.000;85,1;7.000;M\n\
             NORDESTE;261160;RECIFE;6.034;85,7;7.091;F\n\
             NORDESTE;260020;AFRANIO;-;-;440;M\n\
             NORDESTE;260010;AFOGADOS DA INGAZEIRA;800;83,3;960;M\n"
        ),
    );
    write(
        &general,
        "Regiao,Codigo_IBGE,Municipio,Adequado_Qtd,Adequado_Perc,Total\n\
         NORDESTE,261160,RECIFE,12034,85.4,14091\n\
         NORDESTE,260020,AFRANIO,380,86.4,440\n\
         NORDESTE,260005,ABREU E LIMA,400,81.6,490\n",
    );

    let comparison = csv_tools::compare_extracts(&harvested, &general).unwrap();
    assert_eq!(comparison.rows, (4, 3));
    assert_eq!(comparison.only_left_columns, ["Sexo_Codigo"]);
    assert!(comparison.only_right_columns.is_empty());
    assert_eq!(comparison.common, 2);
    assert_eq!(
        comparison.only_left,
        [("260010".to_string(), "AFOGADOS DA INGAZEIRA".to_string())]
    );
    assert_eq!(comparison.only_right, [("260005".to_string(), "ABREU E LIMA".to_string())]);
    assert!(comparison.diffs.is_empty());
    assert_eq!(comparison.totals, (15491, 15021));
    assert!(!comparison.is_identical());

    write(
        &general,
        "Regiao,Codigo_IBGE,Municipio,Adequado_Qtd,Total\n\
         NORDESTE,261160,RECIFE,12000,14091\n\
         NORDESTE,260020,AFRANIO,380,440\n\
         NORDESTE,260010,AFOGADOS DA INGAZEIRA,800,960\n",
    );
    let comparison = csv_tools::compare_extracts(&harvested, &general).unwrap();
    assert_eq!(comparison.diffs.len(), 1);
    let diff = &comparison.diffs[0];
    assert_eq!(diff.ibge_code, "261160");
    assert_eq!(diff.municipality, "RECIFE");
    assert_eq!(diff.column, "Adequado_Qtd");
    assert_eq!((diff.left, diff.right), (12034, 12000));
    assert!(comparison.only_left.is_empty() && comparison.only_right.is_empty());

    let same = csv_tools::compare_extracts(&general, &general).unwrap();
    assert!(same.is_identical());
    assert_eq!(same.common, 3);
}

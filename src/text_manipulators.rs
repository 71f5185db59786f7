use scraper::ElementRef;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("could not read `{raw}` as a {kind}")]
pub struct NumberError {
    pub raw: String,
    pub kind: &'static str,
}

impl NumberError {
    fn new(raw: &str, kind: &'static str) -> Self {
        Self {
            raw: raw.to_string(),
            kind,
        }
    }
}

pub fn extract_text(node: ElementRef) -> String {
    clean_cell(&node.text().collect::<String>())
}

/// Collapses whitespace (including non-breaking spaces) into single spaces.
pub fn clean_cell(raw: &str) -> String {
    raw.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_missing(value: &str) -> bool {
    matches!(value, "" | "-" | "–" | "—")
}

fn all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

// `1.234.567` style thousands grouping.
fn is_grouped(value: &str, separator: char) -> bool {
    let mut parts = value.split(separator);
    let Some(head) = parts.next() else {
        return false;
    };
    let tail: Vec<&str> = parts.collect();
    !tail.is_empty()
        && (1..=3).contains(&head.len())
        && all_digits(head)
        && tail.iter().all(|part| part.len() == 3 && all_digits(part))
}

/// Parses a count cell as printed by the portal.
///
/// `-` and empty cells are missing values. Dots (or commas) in `1.234` position
/// are thousands separators; a zero fraction such as `26.0` is tolerated.
pub fn parse_count(raw: &str) -> Result<Option<u64>, NumberError> {
    let value = clean_cell(raw);
    if is_missing(&value) {
        return Ok(None);
    }

    let digits = if is_grouped(&value, '.') {
        value.replace('.', "")
    } else if is_grouped(&value, ',') {
        value.replace(',', "")
    } else if let Some((int, frac)) = value.split_once(['.', ',']) {
        if !all_digits(frac) || frac.bytes().any(|b| b != b'0') {
            return Err(NumberError::new(raw, "count"));
        }
        int.to_string()
    } else {
        value
    };

    if !all_digits(&digits) {
        return Err(NumberError::new(raw, "count"));
    }
    digits
        .parse::<u64>()
        .map(Some)
        .map_err(|_| NumberError::new(raw, "count"))
}

/// Parses a percentage cell (`12,5%`, `12.5%`, `1.234,5`, `-`).
pub fn parse_percent(raw: &str) -> Result<Option<f64>, NumberError> {
    let cleaned = clean_cell(raw);
    let value = cleaned.trim_end_matches('%').trim();
    if is_missing(value) {
        return Ok(None);
    }

    let normalized = match (value.rfind('.'), value.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => value.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => value.replace(',', ""),
        (None, Some(_)) if value.matches(',').count() == 1 => value.replace(',', "."),
        (None, Some(_)) => value.replace(',', ""),
        (Some(_), None) if value.matches('.').count() > 1 => value.replace('.', ""),
        _ => value.to_string(),
    };

    match normalized.parse::<f64>() {
        Ok(number) if number.is_finite() => Ok(Some(number)),
        _ => Err(NumberError::new(raw, "percentage")),
    }
}

/// Shortest decimal rendering, optionally with a decimal comma.
pub fn format_decimal(value: f64, decimal_comma: bool) -> String {
    let text = value.to_string();
    if decimal_comma {
        text.replace('.', ",")
    } else {
        text
    }
}

/// Age bounds as the form expects them: `0`, `0.5`, `2`.
pub fn format_age(years: f64) -> String {
    format_decimal(years, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accept_grouping_and_zero_fraction() {
        assert_eq!(parse_count("26"), Ok(Some(26)));
        assert_eq!(parse_count("26.0"), Ok(Some(26)));
        assert_eq!(parse_count("12.034"), Ok(Some(12034)));
        assert_eq!(parse_count("1.234.567"), Ok(Some(1_234_567)));
        assert_eq!(parse_count("\u{a0}14091 "), Ok(Some(14091)));
    }

    #[test]
    fn counts_treat_dash_and_blank_as_missing() {
        assert_eq!(parse_count("-"), Ok(None));
        assert_eq!(parse_count("   "), Ok(None));
    }

    #[test]
    fn counts_reject_fractions_and_text() {
        assert!(parse_count("3.5").is_err());
        assert!(parse_count("TOTAL").is_err());
    }

    #[test]
    fn percentages_follow_the_last_separator() {
        assert_eq!(parse_percent("12,5%"), Ok(Some(12.5)));
        assert_eq!(parse_percent("12.5%"), Ok(Some(12.5)));
        assert_eq!(parse_percent("100%"), Ok(Some(100.0)));
        assert_eq!(parse_percent("1.234,5"), Ok(Some(1234.5)));
        assert_eq!(parse_percent("1,234.5"), Ok(Some(1234.5)));
        assert_eq!(parse_percent("-"), Ok(None));
        assert!(parse_percent("abc%").is_err());
    }

    #[test]
    fn decimals_render_shortest_form() {
        assert_eq!(format_decimal(92.31, true), "92,31");
        assert_eq!(format_decimal(100.0, true), "100");
        assert_eq!(format_age(0.5), "0.5");
        assert_eq!(format_age(2.0), "2");
    }

    #[test]
    fn cells_collapse_whitespace() {
        assert_eq!(clean_cell("  AFOGADOS\u{a0}DA \n INGAZEIRA "), "AFOGADOS DA INGAZEIRA");
    }
}

use thiserror::Error;

use crate::layout::ReportLayout;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("no table found in the response")]
    NoTables,
    #[error("could not pick a report layout; row widths seen: {widths:?}")]
    UnknownLayout { widths: Vec<usize> },
    #[error("no municipality rows with {} columns found", .layout.width())]
    NoDataRows { layout: ReportLayout },
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
    #[error("invalid row pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
}

#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("unknown {dimension} code `{code}`")]
    UnknownCode { dimension: &'static str, code: String },
    #[error("age bands only apply to the child life cycle")]
    AgeBandForAdult,
}

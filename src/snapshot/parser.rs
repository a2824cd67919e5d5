//! Snapshot table parsing
//!
//! Maps the downloaded CSV table onto typed rows. The symbol column is
//! required; metric columns are matched by keyword so minor header drift
//! from the source does not break ingestion. Rows that cannot yield a usable
//! symbol are dropped and counted, never fatal.

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use super::normalize::normalize_symbol;
use super::RANK_METRIC;

/// Header candidates for the instrument identifier column.
const SYMBOL_HEADERS: &[&str] = &["SYMBOL", "STOCK", "SCRIP", "INSTRUMENT", "NAME"];

/// Keywords identifying numeric metric columns worth keeping.
const METRIC_KEYWORDS: &[&str] = &[
    "OI",
    "INTEREST",
    "VOLUME",
    "PRICE",
    "CHANGE",
    "VALUE",
    "TURNOVER",
];

/// Structural failures while reading the table.
#[derive(Error, Debug)]
pub enum TableParseError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("No symbol column among headers: {0:?}")]
    MissingSymbolColumn(Vec<String>),

    #[error("Table has a header row but no data rows")]
    NoRows,
}

/// One usable row from the source table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// Normalized instrument symbol
    pub symbol: String,
    /// 1-based position among the source's data rows
    pub rank: u32,
    /// Metric name -> value, including [`RANK_METRIC`]
    pub metrics: BTreeMap<String, Decimal>,
}

/// Outcome of parsing a full table.
#[derive(Debug)]
pub struct ParsedTable {
    pub rows: Vec<ParsedRow>,
    /// Rows dropped for a missing or unusable symbol
    pub dropped: usize,
}

/// Parse the downloaded bytes into rows against the expected column schema.
pub fn parse_table(content: &[u8]) -> Result<ParsedTable, TableParseError> {
    let content = strip_bom(content);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content);

    let headers = reader.headers()?.clone();
    let symbol_idx = headers
        .iter()
        .position(|header| {
            let upper = header.to_uppercase();
            SYMBOL_HEADERS.iter().any(|key| upper.contains(key))
        })
        .ok_or_else(|| {
            TableParseError::MissingSymbolColumn(headers.iter().map(String::from).collect())
        })?;

    let metric_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(idx, header)| {
            *idx != symbol_idx && {
                let upper = header.to_uppercase();
                METRIC_KEYWORDS.iter().any(|key| upper.contains(key))
            }
        })
        .map(|(idx, header)| (idx, metric_key(header)))
        .collect();

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    let mut source_rows = 0u32;

    for record in reader.records() {
        source_rows += 1;
        let record = match record {
            Ok(record) => record,
            Err(_) => {
                dropped += 1;
                continue;
            }
        };

        let symbol = match record.get(symbol_idx).and_then(normalize_symbol) {
            Some(symbol) => symbol,
            None => {
                dropped += 1;
                continue;
            }
        };

        let mut metrics = BTreeMap::new();
        for (idx, key) in &metric_columns {
            if let Some(value) = record.get(*idx).and_then(parse_metric) {
                metrics.insert(key.clone(), value);
            }
        }
        metrics.insert(RANK_METRIC.to_string(), Decimal::from(source_rows));

        rows.push(ParsedRow {
            symbol,
            rank: source_rows,
            metrics,
        });
    }

    if source_rows == 0 {
        return Err(TableParseError::NoRows);
    }

    Ok(ParsedTable { rows, dropped })
}

/// Parse a numeric cell, tolerating thousands separators and the scientific
/// notation the source occasionally emits for small values.
fn parse_metric(raw: &str) -> Option<Decimal> {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    if let Ok(value) = Decimal::from_str(&cleaned) {
        return Some(value);
    }
    cleaned
        .parse::<f64>()
        .ok()
        .and_then(|f| Decimal::try_from(f).ok())
}

/// Lowercased snake_case key for a metric column header.
/// "% CHANGE IN OI" -> "pct_change_in_oi".
fn metric_key(header: &str) -> String {
    let expanded = header.replace('%', " pct ");
    let mut key = String::with_capacity(expanded.len());
    let mut prev_sep = true;
    for c in expanded.trim().chars() {
        if c.is_ascii_alphanumeric() {
            key.push(c.to_ascii_lowercase());
            prev_sep = false;
        } else if !prev_sep {
            key.push('_');
            prev_sep = true;
        }
    }
    if key.ends_with('_') {
        key.pop();
    }
    key
}

fn strip_bom(content: &[u8]) -> &[u8] {
    content.strip_prefix(b"\xef\xbb\xbf").unwrap_or(content)
}

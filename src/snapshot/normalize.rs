//! Instrument identifier normalization
//!
//! The source formats symbols inconsistently across snapshots (stray
//! whitespace, series suffixes, index aliases). Normalization makes the same
//! instrument recognizable across the day so deltas line up.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Exchange series suffixes stripped from equity symbols.
const SERIES_SUFFIXES: &[&str] = &["-EQ", "-BE", "-SM", "-ST", ".EQ", ".BE", ".SM", ".ST"];

/// Canonical names for identifiers the source publishes under more than one
/// spelling. Applied after cleanup, so keys are already uppercased and
/// stripped of whitespace.
static SYMBOL_ALIASES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("NIFTY50", "NIFTY"),
        ("NIFTY-50", "NIFTY"),
        ("NIFTYBANK", "BANKNIFTY"),
        ("BANK-NIFTY", "BANKNIFTY"),
        ("NIFTYFIN", "FINNIFTY"),
        ("NIFTYFINSERVICE", "FINNIFTY"),
    ])
});

/// Placeholder cell values that are not symbols.
const PLACEHOLDERS: &[&str] = &["NAN", "NULL", "NONE", "NA"];

/// Normalize a raw symbol cell.
///
/// Uppercases and trims, strips one series suffix, drops characters outside
/// `[A-Z0-9&_-]`, and canonicalizes known aliases. Returns `None` for cells
/// that cannot be a symbol (too short, all digits, placeholder text).
pub fn normalize_symbol(raw: &str) -> Option<String> {
    let mut symbol = raw.trim().to_uppercase();

    for suffix in SERIES_SUFFIXES {
        if symbol.ends_with(suffix) {
            symbol.truncate(symbol.len() - suffix.len());
            break;
        }
    }

    let symbol: String = symbol
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '&'))
        .collect();

    if symbol.len() < 2 {
        return None;
    }
    if symbol.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if PLACEHOLDERS.contains(&symbol.as_str()) {
        return None;
    }

    Some(
        SYMBOL_ALIASES
            .get(symbol.as_str())
            .map(|canonical| canonical.to_string())
            .unwrap_or(symbol),
    )
}

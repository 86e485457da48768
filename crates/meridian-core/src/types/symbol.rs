//! Symbol normalization helpers.

/// Normalize a user-supplied symbol: trimmed and uppercased.
#[inline]
pub fn normalize_symbol(s: &str) -> String {
    s.trim().to_ascii_uppercase()
}

/// Join symbols into the comma-separated form used by multi-symbol query
/// parameters, normalizing each.
pub fn join_symbols(symbols: &[String]) -> String {
    symbols
        .iter()
        .map(|s| normalize_symbol(s))
        .collect::<Vec<_>>()
        .join(",")
}

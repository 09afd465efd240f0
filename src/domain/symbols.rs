use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Maximum symbols a single news/social item may fan out to.
pub const FANOUT_CAP: usize = 10;

fn ticker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Z]{1,5}\b").expect("static regex"))
}

/// Extract tickers from a provider-supplied comma-separated list.
/// Entries are upper-cased and kept only when 1..=5 characters long.
pub fn from_provider_list(related: &str) -> Vec<String> {
    related
        .split(',')
        .map(|p| p.trim().to_uppercase())
        .filter(|p| (1..=5).contains(&p.len()))
        .collect()
}

/// Extract candidate tickers from free text, preserving first-seen order.
///
/// This will match plain English acronyms too; the watchlist filter is the
/// intended noise suppressor.
pub fn from_text(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let upper = text.to_uppercase();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for m in ticker_re().find_iter(&upper) {
        let sym = m.as_str().to_string();
        if seen.insert(sym.clone()) {
            out.push(sym);
        }
    }
    out
}

/// Apply the operator watchlist. An empty watchlist accepts everything.
pub fn filter_watchlist(symbols: Vec<String>, watchlist: &HashSet<String>) -> Vec<String> {
    if watchlist.is_empty() {
        return symbols;
    }
    symbols.into_iter().filter(|s| watchlist.contains(s)).collect()
}

/// Parse the `watch_symbols` config value into a watchlist set.
pub fn parse_watchlist(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

//! Canonical ↔ venue-native symbol mapping and asset extraction.
//!
//! Canonical spot symbols carry a slash (`BTC/USDT`); canonical perp symbols
//! are the bare concatenation (`BTCUSDT`).

/// The assets the engine trades against USDT.
pub const CORE_ASSETS: [&str; 3] = ["BTC", "ETH", "SOL"];

/// Translate a canonical symbol to the venue-native string. Unmapped symbols
/// pass through unchanged.
pub fn map_symbol<'a>(canonical: &'a str, table: &'a [(&'a str, &'a str)]) -> &'a str {
    table
        .iter()
        .find(|(from, _)| *from == canonical)
        .map(|(_, to)| *to)
        .unwrap_or(canonical)
}

/// kcex uses underscore-separated spot symbols and bare perp symbols.
pub const KCEX_SYMBOLS: &[(&str, &str)] = &[
    ("BTC/USDT", "BTC_USDT"),
    ("ETH/USDT", "ETH_USDT"),
    ("SOL/USDT", "SOL_USDT"),
    ("ETH/BTC", "ETH_BTC"),
    ("SOL/BTC", "SOL_BTC"),
    ("SOL/ETH", "SOL_ETH"),
    ("BTCUSDT", "BTCUSDT"),
    ("ETHUSDT", "ETHUSDT"),
    ("SOLUSDT", "SOLUSDT"),
];

/// nobitex concatenates spot symbols and suffixes perps with `_PERP`.
pub const NOBITEX_SYMBOLS: &[(&str, &str)] = &[
    ("BTC/USDT", "BTCUSDT"),
    ("ETH/USDT", "ETHUSDT"),
    ("SOL/USDT", "SOLUSDT"),
    ("ETH/BTC", "ETHBTC"),
    ("SOL/BTC", "SOLBTC"),
    ("SOL/ETH", "SOLETH"),
    ("BTCUSDT", "BTCUSDT_PERP"),
    ("ETHUSDT", "ETHUSDT_PERP"),
    ("SOLUSDT", "SOLUSDT_PERP"),
];

/// Base asset of a canonical symbol: the part before `/`, otherwise the
/// longest core-asset prefix. Falls back to the whole symbol.
pub fn extract_asset(symbol: &str) -> &str {
    if let Some(idx) = symbol.find('/') {
        return &symbol[..idx];
    }
    for asset in CORE_ASSETS {
        if symbol.starts_with(asset) {
            return asset;
        }
    }
    symbol
}

/// Canonical spot symbol for an asset.
pub fn spot_symbol(asset: &str) -> String {
    format!("{asset}/USDT")
}

/// Canonical perp symbol for an asset.
pub fn perp_symbol(asset: &str) -> String {
    format!("{asset}USDT")
}

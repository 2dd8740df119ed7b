//! Chat message templates.

use num_format::{Locale, ToFormattedString};

use crate::model::CrossRate;
use crate::watch::Fired;

/// Decimal places for rates and their inverses.
pub const RATE_PRECISION: usize = 5;

const MARKET_BANNER: &str = "📘";
const SWAP_BANNER: &str = "💹";
const BANNER_WIDTH: usize = 6;

pub fn rate(value: f64) -> String {
    format!("{value:.prec$}", prec = RATE_PRECISION)
}

/// Whole-unit amount with thousands separators, e.g. `55,123,457`.
pub fn grouped(value: f64) -> String {
    let rounded = value.round();
    if !rounded.is_finite() || rounded.abs() >= i64::MAX as f64 {
        return format!("{rounded}");
    }
    (rounded as i64).to_formatted_string(&Locale::en)
}

/// Splits `"TLM.WAX"` into `("TLM", "WAX")`.
pub fn split_pair(symbol: &str) -> (&str, &str) {
    symbol.split_once('.').unwrap_or((symbol, ""))
}

fn banner(icon: &str) -> String {
    icon.repeat(BANNER_WIDTH)
}

fn pair_lines(symbol: &str, cross: CrossRate) -> String {
    let (name, anchor) = split_pair(symbol);
    format!(
        "1 {name} = {} {anchor}\n1 {anchor} = {} {name}",
        rate(cross.rate),
        rate(cross.inverse)
    )
}

pub fn market_alert(symbol: &str, icon: &str, cross: CrossRate, fired: &Fired) -> String {
    format!(
        "{}\n{}\n{symbol} in market {}\n\n{}",
        banner(MARKET_BANNER),
        banner(icon),
        fired.direction.arrow(),
        pair_lines(symbol, cross)
    )
}

pub fn swap_alert(symbol: &str, icon: &str, cross: CrossRate, fired: &Fired) -> String {
    format!(
        "{}\n{}\n{symbol} in swap {}\n\n{}",
        banner(SWAP_BANNER),
        banner(icon),
        fired.direction.arrow(),
        pair_lines(symbol, cross)
    )
}

/// Labels and icons for a streamed `BASE`/`QUOTE` pair priced in `fiat`.
pub struct TradeLabels<'a> {
    pub base: &'a str,
    pub quote: &'a str,
    pub fiat: &'a str,
    pub icon: &'a str,
    pub quote_icon: &'a str,
}

/// Pair price plus both legs converted to fiat; `n/a` when the quote's fiat
/// price is unavailable.
pub fn trade_alert(
    labels: &TradeLabels<'_>,
    price: f64,
    quote_fiat: Option<f64>,
    fired: &Fired,
) -> String {
    let TradeLabels {
        base,
        quote,
        fiat,
        icon,
        quote_icon,
    } = labels;
    let base_fiat = quote_fiat.map_or_else(|| "n/a".to_owned(), |q| grouped(q * price));
    let quote_fiat = quote_fiat.map_or_else(|| "n/a".to_owned(), grouped);
    let arrow = fired.direction.arrow();
    format!(
        "{icon} {base}_{quote}: {price} {arrow}\n\
         💵 {base}_{fiat}: {base_fiat}\n\
         {quote_icon} {quote}_{fiat}: {quote_fiat}"
    )
}

pub fn poller_started<'a>(symbols: impl IntoIterator<Item = &'a str>) -> String {
    let symbols: Vec<&str> = symbols.into_iter().collect();
    format!("[BOT START]\n{}", symbols.join("\n"))
}

pub fn stream_started(streams: &[String]) -> String {
    format!("BOT STARTED\n\n- {}", streams.join("\n- "))
}

pub const STREAM_READY: &str = "GET READY FOR CUAN";
pub const STREAM_OFF: &str = "BOT OFF";
pub const STOPPED: &str = "BOT STOPPED";

pub fn fetch_failed(what: &str, symbol: &str) -> String {
    format!("FAIL to get {what} {symbol}")
}

pub fn transport_failed(feed: &str, symbol: &str, error: &str) -> String {
    format!("[{feed}] connection failed at {symbol}, skipping rest of sweep\n{error}")
}

pub fn fatal(error: &str) -> String {
    format!("[BOT ERROR]\n{error}")
}

use std::collections::HashSet;
use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_stale_after_secs() -> u64 {
    crate::watch::DEFAULT_STALE_AFTER_SECS
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_binance_rest_url() -> String {
    "https://api.binance.com".into()
}

fn default_binance_ws_url() -> String {
    "wss://stream.binance.com:9443/ws".into()
}

fn default_alcor_url() -> String {
    "https://wax.alcor.exchange".into()
}

fn default_wax_chain_url() -> String {
    "https://wax.blokcrafters.io".into()
}

fn default_amm_contract() -> String {
    "alcorammswap".into()
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".into()
}

fn default_minute_modulus() -> u32 {
    3
}

fn default_symbol_delay_ms() -> u64 {
    1000
}

fn default_anchor_currency() -> String {
    "WAX".into()
}

fn default_fiat() -> String {
    "BIDR".into()
}

fn default_subscription_id() -> u64 {
    1
}

fn default_icon() -> String {
    "🔸".into()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    pub poller: Option<PollerConfig>,
    pub streamer: Option<StreamerConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Re-announce a quantity after this long even if it has not moved.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_binance_rest_url")]
    pub binance_rest_url: String,
    #[serde(default = "default_binance_ws_url")]
    pub binance_ws_url: String,
    #[serde(default = "default_alcor_url")]
    pub alcor_url: String,
    #[serde(default = "default_wax_chain_url")]
    pub wax_chain_url: String,
    /// Contract whose `pairs` table holds the AMM pools.
    #[serde(default = "default_amm_contract")]
    pub amm_contract: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            binance_rest_url: default_binance_rest_url(),
            binance_ws_url: default_binance_ws_url(),
            alcor_url: default_alcor_url(),
            wax_chain_url: default_wax_chain_url(),
            amm_contract: default_amm_contract(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifierConfig {
    Terminal,
    Telegram {
        /// Name of the environment variable holding the destination chat id.
        chat_id_env: String,
        /// Name of the environment variable holding the bot token.
        token_env: String,
        #[serde(default = "default_telegram_api_url")]
        api_url: String,
    },
}

/// Polling driver over order-book deals and AMM pools.
#[derive(Debug, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Sweep when the wall-clock minute is divisible by this value.
    #[serde(default = "default_minute_modulus")]
    pub minute_modulus: u32,
    /// Pause between symbols within one sweep.
    #[serde(default = "default_symbol_delay_ms")]
    pub symbol_delay_ms: u64,
    /// Currency pool rates are quoted in.
    #[serde(default = "default_anchor_currency")]
    pub anchor_currency: String,
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub watches: Vec<PollWatchConfig>,
}

#[derive(Debug, Deserialize)]
pub struct PollWatchConfig {
    /// `NAME.ANCHOR`, e.g. `"TLM.WAX"`.
    pub symbol: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    pub market: Option<QuantityConfig>,
    pub swap: Option<QuantityConfig>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuantityConfig {
    /// Market id for deals, pool id for swaps.
    pub id: u64,
    pub threshold: f64,
}

/// Push driver over a trade stream.
#[derive(Debug, Deserialize)]
pub struct StreamerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fiat suffix used to price the quote asset, e.g. `ETH` + `BIDR`.
    #[serde(default = "default_fiat")]
    pub fiat: String,
    #[serde(default = "default_subscription_id")]
    pub subscription_id: u64,
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub watches: Vec<StreamWatchConfig>,
}

#[derive(Debug, Deserialize)]
pub struct StreamWatchConfig {
    pub base: String,
    pub quote: String,
    pub threshold: f64,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_icon")]
    pub quote_icon: String,
}

impl StreamWatchConfig {
    /// Exchange symbol, e.g. `AXS` + `BNB` → `AXSBNB`.
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote).to_uppercase()
    }
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

/// Read a required environment variable named by the config.
pub fn require_env(name: &str) -> Result<String, Report<ConfigError>> {
    std::env::var(name).change_context(ConfigError::MissingEnv { name: name.into() })
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    if let Some(poller) = &config.poller {
        validate_poller(poller)?;
    }
    if let Some(streamer) = &config.streamer {
        validate_streamer(streamer)?;
    }
    Ok(())
}

fn invalid(field: String) -> Report<ConfigError> {
    Report::new(ConfigError::Validation { field })
}

fn validate_threshold(owner: &str, threshold: f64) -> Result<(), Report<ConfigError>> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(invalid(format!(
            "{owner}.threshold must be a finite non-negative number, got {threshold}"
        )));
    }
    Ok(())
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !matches!(config.general.log_format.as_str(), "text" | "json") {
        return Err(invalid(format!(
            "general.log_format \"{}\" is not one of text, json",
            config.general.log_format
        )));
    }
    if config.general.request_timeout_secs == 0 {
        return Err(invalid("general.request_timeout_secs must be positive".into()));
    }
    Ok(())
}

fn validate_poller(poller: &PollerConfig) -> Result<(), Report<ConfigError>> {
    if !(1..=60).contains(&poller.minute_modulus) {
        return Err(invalid(format!(
            "poller.minute_modulus must be within 1..=60, got {}",
            poller.minute_modulus
        )));
    }
    if poller.enabled && poller.watches.is_empty() {
        return Err(invalid("poller is enabled but has no watches".into()));
    }

    let mut seen = HashSet::new();
    for watch in &poller.watches {
        if !seen.insert(watch.symbol.as_str()) {
            return Err(invalid(format!(
                "poller.watches: duplicate symbol \"{}\"",
                watch.symbol
            )));
        }
        if watch.symbol.split_once('.').is_none() {
            return Err(invalid(format!(
                "poller.watches[\"{}\"].symbol must look like NAME.ANCHOR",
                watch.symbol
            )));
        }
        if watch.market.is_none() && watch.swap.is_none() {
            return Err(invalid(format!(
                "poller.watches[\"{}\"] tracks neither market nor swap",
                watch.symbol
            )));
        }
        if let Some(market) = &watch.market {
            let field = format!("poller.watches[\"{}\"].market", watch.symbol);
            validate_threshold(&field, market.threshold)?;
        }
        if let Some(swap) = &watch.swap {
            let field = format!("poller.watches[\"{}\"].swap", watch.symbol);
            validate_threshold(&field, swap.threshold)?;
        }
    }
    Ok(())
}

fn validate_streamer(streamer: &StreamerConfig) -> Result<(), Report<ConfigError>> {
    if streamer.enabled && streamer.watches.is_empty() {
        return Err(invalid("streamer is enabled but has no watches".into()));
    }

    let mut seen = HashSet::new();
    for watch in &streamer.watches {
        let symbol = watch.symbol();
        validate_threshold(&format!("streamer.watches[\"{symbol}\"]"), watch.threshold)?;
        if !seen.insert(symbol.clone()) {
            return Err(invalid(format!(
                "streamer.watches: duplicate symbol \"{symbol}\""
            )));
        }
    }
    Ok(())
}

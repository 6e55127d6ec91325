use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use types::ids::{AssetId, MarketId};
use types::numeric::Price;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One tradable market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// "BASE/QUOTE" symbol
    pub symbol: MarketId,
    /// Worst-case price used to size market buy reservations; market buys
    /// never execute above it
    pub market_buy_price_cap: Price,
}

impl MarketConfig {
    pub fn new(symbol: MarketId, market_buy_price_cap: Price) -> Self {
        Self {
            symbol,
            market_buy_price_cap,
        }
    }

    pub fn base(&self) -> AssetId {
        self.symbol.base()
    }

    pub fn quote(&self) -> AssetId {
        self.symbol.quote()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if MarketId::try_new(self.symbol.as_str()).is_none() {
            return Err(ConfigError::Invalid(format!(
                "market symbol {} must be BASE/QUOTE",
                self.symbol
            )));
        }
        if self.base() == self.quote() {
            return Err(ConfigError::Invalid(format!(
                "market {} trades an asset against itself",
                self.symbol
            )));
        }
        if !self.market_buy_price_cap.is_positive() {
            return Err(ConfigError::Invalid(format!(
                "market {} needs a positive market_buy_price_cap",
                self.symbol
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory holding `snapshot-<seq>.snap[.zst]` files
    pub dir: PathBuf,
    /// Snapshot every N applied operations (0 disables)
    pub interval_ops: u64,
    /// Snapshot on this timer if anything changed (0 disables)
    pub interval_secs: u64,
    pub compress: bool,
    /// Newest snapshots to retain
    pub keep: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("snapshots"),
            interval_ops: 10_000,
            interval_secs: 60,
            compress: true,
            keep: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Bound of the request queue in front of the sequencer
    pub queue_capacity: usize,
    /// Events buffered per subscriber before it starts lagging
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            event_capacity: 16384,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogFormat {
    COMPACT,
    JSON,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum LogLevel {
    TRACE,
    DEBUG,
    INFO,
    WARN,
    ERROR,
}

impl From<LogLevel> for LevelFilter {
    fn from(val: LogLevel) -> Self {
        match val {
            LogLevel::TRACE => LevelFilter::TRACE,
            LogLevel::DEBUG => LevelFilter::DEBUG,
            LogLevel::INFO => LevelFilter::INFO,
            LogLevel::WARN => LevelFilter::WARN,
            LogLevel::ERROR => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::INFO,
            format: LogFormat::COMPACT,
        }
    }
}

/// Top-level application configuration.
///
/// Loaded with the following precedence (lowest to highest):
/// 1) Built-in defaults
/// 2) Optional TOML file (if present)
/// 3) `MATCHING_` environment variables, `__` separating sections
///    (e.g. `MATCHING_SNAPSHOT__INTERVAL_OPS=500`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub markets: Vec<MarketConfig>,
    pub snapshot: SnapshotConfig,
    pub engine: EngineSettings,
    pub logger: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            markets: vec![MarketConfig::new(
                MarketId::new("BTC/USDT"),
                Price::from_u64(1_000_000),
            )],
            snapshot: SnapshotConfig::default(),
            engine: EngineSettings::default(),
            logger: LogConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if config_path.exists() {
            figment = figment.merge(Toml::file(config_path));
        }
        figment = figment.merge(Env::prefixed("MATCHING_").split("__"));

        let cfg: AppConfig = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.markets.is_empty() {
            return Err(ConfigError::Invalid("at least one market is required".to_string()));
        }
        let mut seen = BTreeSet::new();
        for market in &self.markets {
            market.validate()?;
            if !seen.insert(&market.symbol) {
                return Err(ConfigError::Invalid(format!(
                    "market {} configured twice",
                    market.symbol
                )));
            }
        }
        if self.engine.queue_capacity == 0 || self.engine.event_capacity == 0 {
            return Err(ConfigError::Invalid("engine capacities must be positive".to_string()));
        }
        if self.snapshot.keep == 0 {
            return Err(ConfigError::Invalid("snapshot.keep must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.markets[0].base(), AssetId::new("BTC"));
        assert_eq!(cfg.markets[0].quote(), AssetId::new("USDT"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.markets.len(), 1);
        assert_eq!(cfg.snapshot.interval_ops, 10_000);
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[[markets]]
symbol = "ETH/USDC"
market_buy_price_cap = "50000"

[snapshot]
interval_ops = 250
keep = 2
"#
        )
        .unwrap();

        let cfg = AppConfig::load(&path).unwrap();
        assert_eq!(cfg.markets.len(), 1);
        assert_eq!(cfg.markets[0].symbol, MarketId::new("ETH/USDC"));
        assert_eq!(cfg.markets[0].market_buy_price_cap, Price::from_u64(50_000));
        assert_eq!(cfg.snapshot.interval_ops, 250);
        assert_eq!(cfg.snapshot.keep, 2);
        assert!(cfg.snapshot.compress);
    }

    #[test]
    fn test_rejects_same_base_and_quote() {
        let mut cfg = AppConfig::default();
        cfg.markets = vec![MarketConfig::new(MarketId::new("USDT/USDT"), Price::from_u64(1))];
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_duplicate_markets() {
        let mut cfg = AppConfig::default();
        let market = cfg.markets[0].clone();
        cfg.markets.push(market);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_price_cap() {
        let mut cfg = AppConfig::default();
        cfg.markets[0].market_buy_price_cap = Price::zero();
        assert!(cfg.validate().is_err());
    }
}

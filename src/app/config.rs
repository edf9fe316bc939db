//! Application configuration.
//!
//! Loaded from a TOML file; API credentials come from the environment
//! (`{VENUE}_API_KEY` / `{VENUE}_API_SECRET`), never from the file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use crate::domain::TradingMode;
use crate::error::{Error, Result};
use crate::risk::{OpenOrderCaps, RiskLimits};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub venues: HashMap<String, VenueConfig>,
    #[serde(default)]
    pub strategies: StrategiesConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub cost_model: CostModelConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub instance_id: String,
    pub trading_mode: TradingMode,
    #[serde(default = "default_true")]
    pub require_live_confirmation: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ws_url: String,
    #[serde(default)]
    pub rest_url: String,
    #[serde(default)]
    pub symbols: VenueSymbolsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VenueSymbolsConfig {
    #[serde(default)]
    pub spot: Vec<String>,
    #[serde(default)]
    pub perp: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategiesConfig {
    #[serde(default)]
    pub triangular_arb: TriArbSection,
    #[serde(default)]
    pub basis_arb: BasisArbSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TriArbSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tri_min_edge")]
    pub min_edge_bps: i64,
    #[serde(default = "default_tri_timeout_ms")]
    pub fill_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for TriArbSection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_edge_bps: default_tri_min_edge(),
            fill_timeout_ms: default_tri_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl TriArbSection {
    pub fn fill_timeout(&self) -> Duration {
        Duration::from_millis(self.fill_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasisArbSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_basis_min_edge")]
    pub min_net_edge_bps: i64,
    #[serde(default = "default_basis_timeout_ms")]
    pub fill_timeout_ms: u64,
    #[serde(default = "default_holding_horizon")]
    pub holding_horizon_hours: i64,
    #[serde(default = "default_funding_buffer")]
    pub funding_uncertainty_buffer_bps: i64,
}

impl Default for BasisArbSection {
    fn default() -> Self {
        Self {
            enabled: true,
            min_net_edge_bps: default_basis_min_edge(),
            fill_timeout_ms: default_basis_timeout_ms(),
            holding_horizon_hours: default_holding_horizon(),
            funding_uncertainty_buffer_bps: default_funding_buffer(),
        }
    }
}

impl BasisArbSection {
    pub fn fill_timeout(&self) -> Duration {
        Duration::from_millis(self.fill_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub max_position: HashMap<String, Decimal>,
    #[serde(default)]
    pub max_notional_per_venue: HashMap<String, Decimal>,
    #[serde(default = "default_daily_loss_cap")]
    pub daily_loss_cap_usdt: Decimal,
    #[serde(default = "default_warning_pct")]
    pub warning_threshold_pct: u32,
    #[serde(default)]
    pub max_open_orders: MaxOpenOrdersConfig,
    #[serde(default)]
    pub data_freshness: DataFreshnessConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default = "default_checkpoint_interval_s")]
    pub checkpoint_interval_seconds: u64,
    #[serde(default = "default_kill_switch_path")]
    pub kill_switch_path: PathBuf,
    #[serde(default = "default_order_gc_age_s")]
    pub order_gc_max_age_seconds: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position: HashMap::new(),
            max_notional_per_venue: HashMap::new(),
            daily_loss_cap_usdt: default_daily_loss_cap(),
            warning_threshold_pct: default_warning_pct(),
            max_open_orders: MaxOpenOrdersConfig::default(),
            data_freshness: DataFreshnessConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            checkpoint_interval_seconds: default_checkpoint_interval_s(),
            kill_switch_path: default_kill_switch_path(),
            order_gc_max_age_seconds: default_order_gc_age_s(),
        }
    }
}

impl RiskConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_seconds)
    }

    pub fn order_gc_max_age(&self) -> Duration {
        Duration::from_secs(self.order_gc_max_age_seconds)
    }

    pub fn limits(&self) -> RiskLimits {
        RiskLimits {
            max_position: self.max_position.clone(),
            max_notional_per_venue: self.max_notional_per_venue.clone(),
            daily_loss_cap_usdt: self.daily_loss_cap_usdt,
            warning_threshold_pct: self.warning_threshold_pct,
            max_open_orders: OpenOrderCaps {
                global: self.max_open_orders.global,
                per_venue: self.max_open_orders.per_venue,
                per_symbol: self.max_open_orders.per_symbol,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaxOpenOrdersConfig {
    #[serde(default = "default_global_orders")]
    pub global: usize,
    #[serde(default = "default_venue_orders")]
    pub per_venue: usize,
    #[serde(default = "default_symbol_orders")]
    pub per_symbol: usize,
}

impl Default for MaxOpenOrdersConfig {
    fn default() -> Self {
        Self {
            global: default_global_orders(),
            per_venue: default_venue_orders(),
            per_symbol: default_symbol_orders(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataFreshnessConfig {
    #[serde(default = "default_warning_ms")]
    pub warning_ms: u64,
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
}

impl Default for DataFreshnessConfig {
    fn default() -> Self {
        Self {
            warning_ms: default_warning_ms(),
            block_ms: default_block_ms(),
        }
    }
}

impl DataFreshnessConfig {
    pub fn warning(&self) -> Duration {
        Duration::from_millis(self.warning_ms)
    }

    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_reconcile_interval_s")]
    pub interval_seconds: u64,
    #[serde(default = "default_mismatch_pct")]
    pub mismatch_threshold_pct: Decimal,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_reconcile_interval_s(),
            mismatch_threshold_pct: default_mismatch_pct(),
        }
    }
}

impl ReconciliationConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CostModelConfig {
    #[serde(default = "default_fee_refresh_s")]
    pub fee_tier_refresh_interval_seconds: u64,
    #[serde(default = "default_funding_lookback")]
    pub funding_rate_lookback_intervals: usize,
}

impl Default for CostModelConfig {
    fn default() -> Self {
        Self {
            fee_tier_refresh_interval_seconds: default_fee_refresh_s(),
            funding_rate_lookback_intervals: default_funding_lookback(),
        }
    }
}

impl CostModelConfig {
    pub fn fee_tier_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.fee_tier_refresh_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital_usdt: Decimal,
    #[serde(default)]
    pub simulated_latency_ms: u64,
    #[serde(default)]
    pub reject_rate_pct: f64,
    #[serde(default = "default_sim_seed")]
    pub seed: u64,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            initial_capital_usdt: default_initial_capital(),
            simulated_latency_ms: 0,
            reject_rate_pct: 0.0,
            seed: default_sim_seed(),
        }
    }
}

impl DryRunConfig {
    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_checkpoint_db")]
    pub checkpoint_db: PathBuf,
    #[serde(default = "default_analytics_log")]
    pub analytics_log: PathBuf,
    #[serde(default = "default_write_buffer")]
    pub write_buffer: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            checkpoint_db: default_checkpoint_db(),
            analytics_log: default_analytics_log(),
            write_buffer: default_write_buffer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_ops_addr")]
    pub ops_listen_addr: String,
    #[serde(default)]
    pub alert_channels: Vec<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            ops_listen_addr: default_ops_addr(),
            alert_channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_bus_buffer")]
    pub event_bus_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_bus_buffer: default_bus_buffer(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_tri_min_edge() -> i64 {
    18
}
fn default_tri_timeout_ms() -> u64 {
    3000
}
fn default_max_retries() -> u32 {
    2
}
fn default_basis_min_edge() -> i64 {
    22
}
fn default_basis_timeout_ms() -> u64 {
    15_000
}
fn default_holding_horizon() -> i64 {
    24
}
fn default_funding_buffer() -> i64 {
    5
}
fn default_daily_loss_cap() -> Decimal {
    Decimal::from(12_500)
}
fn default_warning_pct() -> u32 {
    80
}
fn default_global_orders() -> usize {
    50
}
fn default_venue_orders() -> usize {
    25
}
fn default_symbol_orders() -> usize {
    10
}
fn default_warning_ms() -> u64 {
    500
}
fn default_block_ms() -> u64 {
    2000
}
fn default_reconcile_interval_s() -> u64 {
    60
}
fn default_mismatch_pct() -> Decimal {
    Decimal::new(5, 1)
}
fn default_checkpoint_interval_s() -> u64 {
    5
}
fn default_kill_switch_path() -> PathBuf {
    PathBuf::from("data/killswitch.json")
}
fn default_order_gc_age_s() -> u64 {
    3600
}
fn default_fee_refresh_s() -> u64 {
    300
}
fn default_funding_lookback() -> usize {
    12
}
fn default_initial_capital() -> Decimal {
    Decimal::from(100_000)
}
fn default_sim_seed() -> u64 {
    1
}
fn default_checkpoint_db() -> PathBuf {
    PathBuf::from("data/checkpoints.db")
}
fn default_analytics_log() -> PathBuf {
    PathBuf::from("data/analytics.jsonl")
}
fn default_write_buffer() -> usize {
    10_000
}
fn default_ops_addr() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_bus_buffer() -> usize {
    1024
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.system.instance_id.is_empty() {
            return Err(Error::Config("system.instance_id must be set".into()));
        }
        if self.system.trading_mode == TradingMode::Backtest {
            return Err(Error::Config(
                "backtest mode is not implemented; use dry_run".into(),
            ));
        }
        if self.risk.daily_loss_cap_usdt <= Decimal::ZERO {
            return Err(Error::Config("risk.daily_loss_cap_usdt must be positive".into()));
        }
        if self.risk.warning_threshold_pct == 0 || self.risk.warning_threshold_pct > 100 {
            return Err(Error::Config(
                "risk.warning_threshold_pct must be in (0, 100]".into(),
            ));
        }
        if self.risk.data_freshness.block_ms <= self.risk.data_freshness.warning_ms {
            return Err(Error::Config(
                "risk.data_freshness.block_ms must exceed warning_ms".into(),
            ));
        }
        for (name, venue) in &self.venues {
            if venue.enabled
                && self.system.trading_mode == TradingMode::Live
                && (venue.ws_url.is_empty() || venue.rest_url.is_empty())
            {
                return Err(Error::Config(format!(
                    "venue {name} is enabled for live trading but has no URLs"
                )));
            }
        }
        if !self.venues.values().any(|v| v.enabled) {
            return Err(Error::Config("no venue is enabled".into()));
        }
        Ok(())
    }

    pub fn init_logging(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.logging.level.clone()));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    /// Canonical symbols this venue trades, spot then perp.
    pub fn venue_symbols(&self, venue: &str) -> Vec<String> {
        let Some(config) = self.venues.get(venue) else {
            return Vec::new();
        };
        config
            .symbols
            .spot
            .iter()
            .chain(config.symbols.perp.iter())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn minimal_toml() -> &'static str {
        r#"
            [system]
            instance_id = "trader-1"
            trading_mode = "dry_run"

            [venues.kcex]
            enabled = true

            [venues.kcex.symbols]
            spot = ["BTC/USDT", "ETH/USDT"]
            perp = ["BTCUSDT"]
        "#
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.strategies.triangular_arb.min_edge_bps, 18);
        assert_eq!(config.strategies.basis_arb.min_net_edge_bps, 22);
        assert_eq!(config.risk.daily_loss_cap_usdt, dec!(12500));
        assert_eq!(config.risk.data_freshness.warning_ms, 500);
        assert_eq!(config.risk.data_freshness.block_ms, 2000);
        assert_eq!(config.risk.checkpoint_interval_seconds, 5);
        assert_eq!(config.cost_model.funding_rate_lookback_intervals, 12);
        assert_eq!(
            config.venue_symbols("kcex"),
            vec!["BTC/USDT", "ETH/USDT", "BTCUSDT"]
        );
    }

    #[test]
    fn backtest_mode_rejected() {
        let raw = minimal_toml().replace("dry_run", "backtest");
        let config: Config = toml::from_str(&raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn live_requires_urls() {
        let raw = minimal_toml().replace("dry_run", "live");
        let config: Config = toml::from_str(&raw).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn risk_limits_conversion() {
        let raw = format!(
            "{}\n[risk.max_position]\nBTC = \"1.5\"\n",
            minimal_toml()
        );
        let config: Config = toml::from_str(&raw).unwrap();
        let limits = config.risk.limits();
        assert_eq!(limits.max_position.get("BTC"), Some(&dec!(1.5)));
        assert_eq!(limits.max_open_orders.global, 50);
    }
}

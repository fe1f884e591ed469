/// Engine configuration loaded from a single TOML file.
///
/// Every section rejects unrecognized fields at load time instead of
/// silently ignoring them, so a typoed threshold fails fast.

use serde::{Deserialize, Serialize};

use crate::core::EngineError;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub retry: RetryConfig,
    pub trading: TradingConfig,
    pub paths: PathsConfig,
    pub broker: BrokerConfig,
    pub telegram: Option<TelegramConfig>,
}

/// Indicator thresholds for the signal engine.
///
/// Field names are the engine's vocabulary, not any one indicator
/// library's: the oscillator is RSI, the volatility measure is ATR, the
/// trend-strength measure is ADX, the bands are Bollinger bands.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct StrategyConfig {
    pub fast_period: usize,
    pub slow_period: usize,
    pub oscillator_period: usize,
    pub oscillator_overbought: f64,
    pub oscillator_oversold: f64,
    pub volatility_period: usize,
    pub strength_period: usize,
    pub band_period: usize,
    pub band_deviation: f64,
    pub strength_floor: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 50,
            oscillator_period: 14,
            oscillator_overbought: 70.0,
            oscillator_oversold: 30.0,
            volatility_period: 14,
            strength_period: 14,
            band_period: 20,
            band_deviation: 2.0,
            strength_floor: 20.0,
        }
    }
}

impl StrategyConfig {
    /// Bars needed before every derived column is defined.
    ///
    /// ADX is the slow one: Wilder smoothing over DX needs 2n-1 bars.
    pub fn required_history(&self) -> usize {
        [
            self.fast_period,
            self.slow_period,
            self.oscillator_period + 1,
            self.volatility_period + 1,
            2 * self.strength_period,
            self.band_period,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct RiskConfig {
    /// Fraction of session capital risked per trade (0.01 = 1%).
    pub risk_fraction: f64,
    /// Take-profit distance as a multiple of the volatility measure.
    pub take_profit_multiplier: f64,
    /// Absolute cap on computed position size in units.
    pub max_units: u64,
    /// Capital allocated from the wallet at session start.
    pub session_capital: f64,
    /// Wallet balance used the first time no wallet file exists.
    pub initial_wallet_balance: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: 0.01,
            take_profit_multiplier: 2.5,
            max_units: 1_000_000,
            session_capital: 500.0,
            initial_wallet_balance: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: f64,
    /// Total wall-clock budget across all attempts.
    pub deadline_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            backoff_factor: 2.0,
            deadline_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct TradingConfig {
    pub instruments: Vec<String>,
    /// Seconds between decision cycles.
    pub cycle_interval_secs: u64,
    /// Seconds between reconciliation passes.
    pub reconcile_interval_secs: u64,
    /// Bars fetched per cycle; must cover indicator warm-up and the
    /// direction filter window.
    pub bar_count: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            instruments: vec!["EUR_USD".to_string(), "USD_JPY".to_string()],
            cycle_interval_secs: 60,
            reconcile_interval_secs: 60,
            bar_count: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct PathsConfig {
    pub wallet_file: String,
    pub ledger_file: String,
    pub model_file: String,
    pub results_dir: String,
    pub log_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            wallet_file: "data/wallet.json".to_string(),
            ledger_file: "data/trade_log.csv".to_string(),
            model_file: "models/direction.json".to_string(),
            results_dir: "results".to_string(),
            log_dir: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerConfig {
    pub api_url: String,
    pub account_id: String,
    /// Name of the environment variable holding the API token.
    pub api_token_env: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    pub bot_token_env: String,
    pub chat_id: String,
}

impl EngineConfig {
    pub fn load_from_file(path: &str) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)
            .map_err(|e| EngineError::Persistence(format!("config parse: {e}")))?;
        Ok(config)
    }
}

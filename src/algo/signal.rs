/// Indicator frame construction and deterministic signal rules.

use serde::Serialize;
use tracing::debug;

use crate::algo::indicators;
use crate::config::StrategyConfig;
use crate::core::{Bar, EngineError, Signal};

/// Derived indicator columns for one bar. `None` during warm-up.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorRow {
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub adx: Option<f64>,
    pub band_upper: Option<f64>,
    pub band_lower: Option<f64>,
}

/// An ordered bar series augmented with derived columns, row-aligned.
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    pub bars: Vec<Bar>,
    pub rows: Vec<IndicatorRow>,
}

impl IndicatorFrame {
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Last bar with its derived columns.
    pub fn last(&self) -> Option<(&Bar, &IndicatorRow)> {
        Some((self.bars.last()?, self.rows.last()?))
    }
}

/// Computes every derived column over the series. Pure and deterministic.
///
/// Fails with `InsufficientHistory` when the series is shorter than the
/// largest lookback in the configuration, so consumers never see a frame
/// whose tail is still warming up.
pub fn compute_indicators(
    bars: &[Bar],
    config: &StrategyConfig,
) -> Result<IndicatorFrame, EngineError> {
    let required = config.required_history();
    if bars.len() < required {
        return Err(EngineError::InsufficientHistory {
            required,
            got: bars.len(),
        });
    }

    let ema_fast = indicators::ema(bars, config.fast_period);
    let ema_slow = indicators::ema(bars, config.slow_period);
    let rsi = indicators::rsi(bars, config.oscillator_period);
    let atr = indicators::atr(bars, config.volatility_period);
    let adx = indicators::adx(bars, config.strength_period);
    let bands = indicators::bollinger(bars, config.band_period, config.band_deviation);

    let rows = (0..bars.len())
        .map(|i| IndicatorRow {
            ema_fast: ema_fast[i],
            ema_slow: ema_slow[i],
            rsi: rsi[i],
            atr: atr[i],
            adx: adx[i],
            band_upper: bands[i].map(|(u, _)| u),
            band_lower: bands[i].map(|(_, l)| l),
        })
        .collect();

    Ok(IndicatorFrame {
        bars: bars.to_vec(),
        rows,
    })
}

/// Applies the trend, momentum, and strength conditions to one row.
///
/// Buy requires all three on the bullish side, Sell all three on the
/// bearish side, anything else holds. Thresholds are exclusive: a value
/// sitting exactly on a threshold resolves to Hold. A row still inside
/// warm-up (any required column `None`) also holds.
pub fn generate_signal(row: &IndicatorRow, config: &StrategyConfig) -> Signal {
    let (Some(fast), Some(slow), Some(rsi), Some(adx)) =
        (row.ema_fast, row.ema_slow, row.rsi, row.adx)
    else {
        return Signal::Hold;
    };

    let trending = adx > config.strength_floor;
    if !trending {
        return Signal::Hold;
    }

    if fast > slow && rsi < config.oscillator_oversold {
        debug!(fast, slow, rsi, adx, "bullish conditions met");
        Signal::Buy
    } else if fast < slow && rsi > config.oscillator_overbought {
        debug!(fast, slow, rsi, adx, "bearish conditions met");
        Signal::Sell
    } else {
        Signal::Hold
    }
}

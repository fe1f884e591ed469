/// Shared data model for the decision-and-execution pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One time-stamped OHLC(V) observation for an instrument.
///
/// Bars are ordered by `time` per instrument and immutable once produced.
/// When the upstream feed only supplies bid/ask quotes, all four price
/// fields carry the mid-price (degraded mode, see `broker::MarketData`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub instrument: String,
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Categorical trading decision attached to a bar.
///
/// Also the output type of the direction filter, so a signal and its
/// confirmation compare directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    Hold,
    Buy,
    Sell,
}

impl Signal {
    /// True for Buy/Sell; Hold never reaches the sizing stage.
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Signal::Hold)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Hold => "Hold",
            Signal::Buy => "Buy",
            Signal::Sell => "Sell",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sizing decision prior to submission.
///
/// `client_trade_id` is derived from instrument + submission timestamp at
/// second resolution and stays constant across retries of one submission,
/// so a retried order can never create two broker-side positions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeIntent {
    pub instrument: String,
    pub direction: Signal,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub units: u64,
    pub client_trade_id: String,
}

impl TradeIntent {
    /// Deterministic client id: `{instrument}_{UTC %Y%m%d%H%M%S}`.
    pub fn client_id_for(instrument: &str, at: DateTime<Utc>) -> String {
        format!("{}_{}", instrument, at.format("%Y%m%d%H%M%S"))
    }
}

/// Broker acknowledgement of an order submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Order filled at the given price.
    Filled { fill_price: f64 },
    /// Broker refused the order; not retried.
    Rejected { reason: String },
}

/// Broker-reported closed position used by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub instrument: String,
    pub units: u64,
    pub entry_price: f64,
    pub realized_pnl: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    /// Client-extensions id echoed back by the broker, when present.
    /// Enables exact reconciliation instead of the heuristic key.
    pub client_trade_id: Option<String>,
}

/// One persisted record per submitted order.
///
/// Appended with `profit = 0, duration_min = 0` (pending), mutated exactly
/// once by the reconciler, never deleted. Field order is the on-disk CSV
/// column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRow {
    pub time: DateTime<Utc>,
    pub client_trade_id: String,
    pub instrument: String,
    pub signal: Signal,
    pub price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub units: u64,
    pub model_prediction: Signal,
    pub prediction_matched: bool,
    pub profit: f64,
    pub cumulative_profit: f64,
    pub duration_min: f64,
}

impl LedgerRow {
    /// A row is pending until the reconciler fills in realized P&L.
    pub fn is_pending(&self) -> bool {
        self.profit == 0.0 && self.duration_min == 0.0
    }
}

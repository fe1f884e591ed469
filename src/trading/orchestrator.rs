/// Position sizer and order orchestrator.
///
/// One decision cycle walks Idle -> SignalEvaluated -> Sized -> Submitting
/// -> {Confirmed, Rejected}. The orchestrator exclusively owns the capital
/// ledger (allocate at session start, settle at session end) and is the
/// only appender of pending trade-ledger rows; the reconciler settles them
/// later, decoupled from this path.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::algo::{compute_indicators, generate_signal};
use crate::broker::OrderGateway;
use crate::config::{RiskConfig, StrategyConfig};
use crate::core::{Bar, EngineError, LedgerRow, Signal, SubmitOutcome, TradeIntent};
use crate::ledger::TradeLedger;
use crate::model::DirectionFilter;
use crate::notify::{notify_best_effort, Notifier};
use crate::trading::retry::{retry_with_backoff, RetryPolicy};
use crate::wallet::CapitalLedger;

/// Minimum price increment scale used to convert volatility into units.
pub fn pip_value(instrument: &str) -> f64 {
    let quote = instrument.rsplit('_').next().unwrap_or("");
    if quote == "JPY" {
        0.01
    } else {
        0.0001
    }
}

/// Volatility-scaled position size, clamped to the configured maximum.
pub fn position_units(
    session_balance: f64,
    risk_fraction: f64,
    atr: f64,
    pip: f64,
    max_units: u64,
) -> u64 {
    if atr <= 0.0 || pip <= 0.0 {
        return 0;
    }
    let raw = (session_balance * risk_fraction) / (atr * pip);
    (raw.round() as u64).min(max_units)
}

/// Terminal state of one decision cycle. Rejected-by-filter and
/// rejected-by-broker are distinct, countable outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Hold,
    RejectedByFilter {
        signal: Signal,
        predicted: Option<Signal>,
    },
    ZeroSize,
    RejectedByBroker {
        reason: String,
    },
    Filled {
        intent: TradeIntent,
        fill_price: f64,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CycleStats {
    pub cycles: u64,
    pub holds: u64,
    pub rejected_by_filter: u64,
    pub rejected_by_broker: u64,
    pub zero_size: u64,
    pub filled: u64,
}

pub struct OrderOrchestrator {
    strategy: StrategyConfig,
    risk: RiskConfig,
    retry: RetryPolicy,
    gateway: Arc<dyn OrderGateway>,
    /// `None` when no model artifact could be loaded: the gate stays
    /// closed and every signal is rejected-by-filter, never bypassed.
    filter: Option<Arc<dyn DirectionFilter>>,
    ledger: Arc<Mutex<TradeLedger>>,
    notifier: Arc<dyn Notifier>,
    wallet: CapitalLedger,
    stats: CycleStats,
}

impl OrderOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        strategy: StrategyConfig,
        risk: RiskConfig,
        retry: RetryPolicy,
        gateway: Arc<dyn OrderGateway>,
        filter: Option<Arc<dyn DirectionFilter>>,
        ledger: Arc<Mutex<TradeLedger>>,
        notifier: Arc<dyn Notifier>,
        wallet: CapitalLedger,
    ) -> Self {
        if filter.is_none() {
            warn!("no direction model loaded; every signal will be rejected by the filter gate");
        }
        Self {
            strategy,
            risk,
            retry,
            gateway,
            filter,
            ledger,
            notifier,
            wallet,
            stats: CycleStats::default(),
        }
    }

    pub fn stats(&self) -> CycleStats {
        self.stats
    }

    pub fn wallet(&self) -> &CapitalLedger {
        &self.wallet
    }

    /// Allocates the configured session capital from the wallet.
    pub fn open_session(&mut self) -> Result<(), EngineError> {
        self.wallet.allocate_session(self.risk.session_capital)
    }

    /// Returns session capital plus realized P&L to the wallet.
    pub fn settle_session(&mut self, pnl: f64) -> Result<f64, EngineError> {
        self.wallet.settle_session(pnl)
    }

    /// Full decision cycle over a fresh bar series for one instrument.
    pub async fn run_cycle(&mut self, bars: &[Bar]) -> Result<CycleOutcome, EngineError> {
        let frame = compute_indicators(bars, &self.strategy)?;
        let Some((bar, row)) = frame.last() else {
            return Ok(CycleOutcome::Hold);
        };

        let signal = generate_signal(row, &self.strategy);
        let Some(atr) = row.atr else {
            return Ok(CycleOutcome::Hold);
        };
        let instrument = bar.instrument.clone();
        let entry_price = bar.close;
        self.process_signal(bars, &instrument, entry_price, signal, atr)
            .await
    }

    /// Gate, size, and submit an evaluated signal.
    pub async fn process_signal(
        &mut self,
        window: &[Bar],
        instrument: &str,
        entry_price: f64,
        signal: Signal,
        atr: f64,
    ) -> Result<CycleOutcome, EngineError> {
        self.stats.cycles += 1;

        if !signal.is_actionable() {
            self.stats.holds += 1;
            return Ok(CycleOutcome::Hold);
        }

        // Confirmation gate: the model's prediction must agree with the
        // signal's direction before any order attempt.
        let predicted = match &self.filter {
            Some(filter) => Some(filter.predict(window)?),
            None => None,
        };
        if predicted != Some(signal) {
            self.stats.rejected_by_filter += 1;
            info!(
                instrument,
                signal = %signal,
                predicted = ?predicted,
                "signal rejected by direction filter"
            );
            return Ok(CycleOutcome::RejectedByFilter { signal, predicted });
        }

        let pip = pip_value(instrument);
        let units = position_units(
            self.wallet.session_balance(),
            self.risk.risk_fraction,
            atr,
            pip,
            self.risk.max_units,
        );
        if units == 0 {
            self.stats.zero_size += 1;
            warn!(instrument, atr, "{}", EngineError::ZeroSize);
            return Ok(CycleOutcome::ZeroSize);
        }

        let (stop_loss, take_profit) = match signal {
            Signal::Buy => (
                entry_price - atr,
                entry_price + self.risk.take_profit_multiplier * atr,
            ),
            _ => (
                entry_price + atr,
                entry_price - self.risk.take_profit_multiplier * atr,
            ),
        };

        let intent = TradeIntent {
            instrument: instrument.to_string(),
            direction: signal,
            entry_price,
            stop_loss,
            take_profit,
            units,
            client_trade_id: TradeIntent::client_id_for(instrument, Utc::now()),
        };

        self.submit_intent(intent, signal).await
    }

    /// Submission with bounded retries: the same client trade id on every
    /// attempt, so a lost confirmation retried cannot double-open.
    async fn submit_intent(
        &mut self,
        intent: TradeIntent,
        predicted: Signal,
    ) -> Result<CycleOutcome, EngineError> {
        info!(
            instrument = %intent.instrument,
            direction = %intent.direction,
            units = intent.units,
            client_trade_id = %intent.client_trade_id,
            "submitting order"
        );

        let gateway = Arc::clone(&self.gateway);
        let submitted = retry_with_backoff(&self.retry, "order submission", || {
            let gateway = Arc::clone(&gateway);
            let intent = intent.clone();
            async move { gateway.submit(&intent).await }
        })
        .await;

        let outcome = match submitted {
            Ok(SubmitOutcome::Filled { fill_price }) => {
                self.confirm_fill(&intent, predicted, fill_price).await?;
                self.stats.filled += 1;
                CycleOutcome::Filled { intent, fill_price }
            }
            Ok(SubmitOutcome::Rejected { reason }) => {
                self.stats.rejected_by_broker += 1;
                warn!(
                    instrument = %intent.instrument,
                    reason = %reason,
                    "order rejected by broker"
                );
                CycleOutcome::RejectedByBroker { reason }
            }
            Err(retry_err) => {
                self.stats.rejected_by_broker += 1;
                let reason = EngineError::MaxRetriesExceeded {
                    attempts: retry_err.attempts(),
                }
                .to_string();
                error!(instrument = %intent.instrument, reason = %reason, "order submission gave up");
                notify_best_effort(
                    self.notifier.as_ref(),
                    &format!("Order failed: {} {}\n{}", intent.instrument, predicted, reason),
                )
                .await;
                CycleOutcome::RejectedByBroker { reason }
            }
        };
        Ok(outcome)
    }

    /// The single side-effecting write per successful cycle: append the
    /// pending row, then alert the operator. A ledger write failure is
    /// fatal to the cycle — the engine must not act as if the row exists.
    async fn confirm_fill(
        &mut self,
        intent: &TradeIntent,
        predicted: Signal,
        fill_price: f64,
    ) -> Result<(), EngineError> {
        let row = LedgerRow {
            time: Utc::now(),
            client_trade_id: intent.client_trade_id.clone(),
            instrument: intent.instrument.clone(),
            signal: intent.direction,
            price: fill_price,
            stop_loss: intent.stop_loss,
            take_profit: intent.take_profit,
            units: intent.units,
            model_prediction: predicted,
            prediction_matched: true,
            profit: 0.0,
            cumulative_profit: 0.0,
            duration_min: 0.0,
        };

        self.ledger.lock().await.append(&row)?;

        notify_best_effort(
            self.notifier.as_ref(),
            &format!(
                "Trade filled: {} {}\nEntry: {:.5}\nSL: {:.5} | TP: {:.5}\nUnits: {}",
                intent.instrument,
                intent.direction,
                fill_price,
                intent.stop_loss,
                intent.take_profit,
                intent.units
            ),
        )
        .await;
        Ok(())
    }
}

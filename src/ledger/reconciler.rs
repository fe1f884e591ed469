/// Periodic reconciliation of broker-reported closed positions against
/// pending ledger rows.
///
/// Matching prefers the exact client trade id echoed back through the
/// broker's client-extensions field; a position that carries an id which
/// matches no row stays unmatched rather than falling through. Only fills
/// reported without any id use the heuristic key {instrument, units,
/// price rounded to 4 decimal places} over pending rows, and a zero or
/// multi-candidate outcome is skipped and logged, never guessed: a
/// mismatch is a data-quality signal, not an error to mask. Settled rows
/// (profit != 0) are never re-matched, which makes the whole pass
/// idempotent.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::broker::PositionQuery;
use crate::core::{ClosedPosition, EngineError, LedgerRow};
use crate::ledger::{recompute_cumulative, TradeLedger};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub settled: usize,
    pub unmatched: usize,
    pub ambiguous: usize,
}

pub struct Reconciler {
    ledger: Arc<Mutex<TradeLedger>>,
    positions: Arc<dyn PositionQuery>,
    /// Lower bound for the next closed-position query. `None` until the
    /// first pass, which derives it from the ledger so trades closed
    /// while the process was down still reconcile after a restart.
    last_check: Option<DateTime<Utc>>,
}

fn round4(price: f64) -> f64 {
    (price * 10_000.0).round() / 10_000.0
}

enum MatchResult {
    Settled(usize),
    AlreadySettled,
    NoMatch,
    Ambiguous(usize),
}

fn find_match(rows: &[LedgerRow], position: &ClosedPosition) -> MatchResult {
    // A position carrying an id is matched on that id alone; an id we
    // never issued must not settle some same-key row instead.
    if let Some(id) = &position.client_trade_id {
        return match rows.iter().position(|r| &r.client_trade_id == id) {
            Some(idx) if rows[idx].is_pending() => MatchResult::Settled(idx),
            Some(_) => MatchResult::AlreadySettled,
            None => MatchResult::NoMatch,
        };
    }

    // Heuristic fallback for fills reported without any id.
    let candidates: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            r.is_pending()
                && r.instrument == position.instrument
                && r.units == position.units
                && round4(r.price) == round4(position.entry_price)
        })
        .map(|(i, _)| i)
        .collect();

    match candidates.len() {
        0 => MatchResult::NoMatch,
        1 => MatchResult::Settled(candidates[0]),
        n => MatchResult::Ambiguous(n),
    }
}

fn settle_row(row: &mut LedgerRow, position: &ClosedPosition) {
    row.profit = position.realized_pnl;
    row.duration_min = (position.close_time - position.open_time).num_seconds() as f64 / 60.0;
}

/// Applies one batch of closed positions to the given rows. Pure over its
/// inputs so it can be exercised without a broker.
pub fn apply_closed_positions(
    rows: &mut Vec<LedgerRow>,
    positions: &[ClosedPosition],
) -> ReconcileSummary {
    let mut summary = ReconcileSummary::default();

    for position in positions {
        match find_match(rows, position) {
            MatchResult::Settled(idx) => {
                settle_row(&mut rows[idx], position);
                summary.settled += 1;
                info!(
                    instrument = %position.instrument,
                    profit = position.realized_pnl,
                    client_trade_id = ?position.client_trade_id,
                    "trade settled"
                );
            }
            MatchResult::AlreadySettled => {
                debug!(
                    client_trade_id = ?position.client_trade_id,
                    "closed position already settled, skipping"
                );
            }
            MatchResult::NoMatch => {
                summary.unmatched += 1;
                warn!(
                    instrument = %position.instrument,
                    units = position.units,
                    "no pending row matches closed position"
                );
            }
            MatchResult::Ambiguous(n) => {
                summary.ambiguous += 1;
                let e = EngineError::ReconciliationAmbiguous {
                    instrument: position.instrument.clone(),
                    candidates: n,
                };
                warn!(error = %e, "skipping ambiguous reconciliation, left pending");
            }
        }
    }

    if summary.settled > 0 {
        recompute_cumulative(rows);
    }
    summary
}

impl Reconciler {
    pub fn new(ledger: Arc<Mutex<TradeLedger>>, positions: Arc<dyn PositionQuery>) -> Self {
        Self {
            ledger,
            positions,
            last_check: None,
        }
    }

    /// Query lower bound for the first pass: the earliest pending row's
    /// open time, so a trade the broker closed before startup is still
    /// in range. Open time always precedes close time.
    async fn initial_check_point(&self, fallback: DateTime<Utc>) -> Result<DateTime<Utc>, EngineError> {
        let rows = self.ledger.lock().await.load_rows()?;
        Ok(rows
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| r.time)
            .min()
            .unwrap_or(fallback))
    }

    /// One reconciliation pass: fetch, match, and (if anything settled)
    /// rewrite the ledger in a single atomic replace.
    pub async fn run_once(&mut self) -> Result<ReconcileSummary, EngineError> {
        let pass_started = Utc::now();
        let since = match self.last_check {
            Some(t) => t,
            None => self.initial_check_point(pass_started).await?,
        };
        let closed = self
            .positions
            .list_closed_positions(since)
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        if closed.is_empty() {
            self.last_check = Some(pass_started);
            return Ok(ReconcileSummary::default());
        }

        let ledger = self.ledger.lock().await;
        let mut rows = ledger.load_rows()?;
        let summary = apply_closed_positions(&mut rows, &closed);
        if summary.settled > 0 {
            ledger.rewrite(&rows)?;
        }
        drop(ledger);

        self.last_check = Some(pass_started);
        Ok(summary)
    }

    /// Reconciliation loop, decoupled from the decision cycle. A failed
    /// pass is logged and retried at the next tick; `last_check` only
    /// advances on success so no fill window is ever skipped.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), EngineError> {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(summary) if summary != ReconcileSummary::default() => {
                            info!(
                                settled = summary.settled,
                                unmatched = summary.unmatched,
                                ambiguous = summary.ambiguous,
                                "reconciliation pass complete"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "reconciliation pass failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("reconciler shutting down");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerError, PositionQuery};
    use crate::core::Signal;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn pending_row(n: i64, instrument: &str, units: u64, price: f64) -> LedgerRow {
        let time = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap() + ChronoDuration::minutes(n);
        LedgerRow {
            time,
            client_trade_id: format!("{instrument}_{n}"),
            instrument: instrument.to_string(),
            signal: Signal::Buy,
            price,
            stop_loss: price - 0.002,
            take_profit: price + 0.005,
            units,
            model_prediction: Signal::Buy,
            prediction_matched: true,
            profit: 0.0,
            cumulative_profit: 0.0,
            duration_min: 0.0,
        }
    }

    fn closed(
        instrument: &str,
        units: u64,
        price: f64,
        pnl: f64,
        id: Option<&str>,
    ) -> ClosedPosition {
        let open = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap();
        ClosedPosition {
            instrument: instrument.to_string(),
            units,
            entry_price: price,
            realized_pnl: pnl,
            open_time: open,
            close_time: open + ChronoDuration::minutes(90),
            client_trade_id: id.map(str::to_string),
        }
    }

    #[test]
    fn exact_id_match_settles_the_row() {
        let mut rows = vec![
            pending_row(0, "EUR_USD", 2500, 1.1050),
            pending_row(1, "EUR_USD", 2500, 1.1050),
        ];
        let positions = vec![closed("EUR_USD", 2500, 1.1050, 75.0, Some("EUR_USD_1"))];

        let summary = apply_closed_positions(&mut rows, &positions);
        assert_eq!(summary.settled, 1);
        assert!(rows[0].is_pending());
        assert_eq!(rows[1].profit, 75.0);
        assert_eq!(rows[1].duration_min, 90.0);
    }

    #[test]
    fn heuristic_match_requires_exactly_one_candidate() {
        let mut rows = vec![
            pending_row(0, "EUR_USD", 2500, 1.1050),
            pending_row(1, "EUR_USD", 2500, 1.1050),
        ];
        // Two identical pending rows, no client id: ambiguous, skip both.
        let positions = vec![closed("EUR_USD", 2500, 1.1050, 75.0, None)];

        let summary = apply_closed_positions(&mut rows, &positions);
        assert_eq!(summary.settled, 0);
        assert_eq!(summary.ambiguous, 1);
        assert!(rows.iter().all(LedgerRow::is_pending));
    }

    #[test]
    fn price_tolerance_is_four_decimals() {
        let mut rows = vec![pending_row(0, "EUR_USD", 2500, 1.10504)];
        let positions = vec![closed("EUR_USD", 2500, 1.10498, 12.0, None)];

        // 1.10504 -> 1.1050, 1.10498 -> 1.1050: same key.
        let summary = apply_closed_positions(&mut rows, &positions);
        assert_eq!(summary.settled, 1);
    }

    #[test]
    fn unmatched_id_never_falls_back_to_the_heuristic() {
        // A pending row shares the heuristic key, but the position carries
        // an id we never issued: it must stay unmatched.
        let mut rows = vec![pending_row(0, "EUR_USD", 2500, 1.1050)];
        let positions = vec![closed("EUR_USD", 2500, 1.1050, 75.0, Some("EUR_USD_999"))];

        let summary = apply_closed_positions(&mut rows, &positions);
        assert_eq!(summary.settled, 0);
        assert_eq!(summary.unmatched, 1);
        assert!(rows[0].is_pending());
    }

    #[test]
    fn unmatched_positions_are_counted_not_guessed() {
        let mut rows = vec![pending_row(0, "EUR_USD", 2500, 1.1050)];
        let positions = vec![closed("USD_JPY", 400, 151.20, -8.0, None)];

        let summary = apply_closed_positions(&mut rows, &positions);
        assert_eq!(summary.settled, 0);
        assert_eq!(summary.unmatched, 1);
        assert!(rows[0].is_pending());
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let mut rows = vec![
            pending_row(0, "EUR_USD", 2500, 1.1050),
            pending_row(1, "USD_JPY", 400, 151.20),
        ];
        let positions = vec![
            closed("EUR_USD", 2500, 1.1050, 60.0, Some("EUR_USD_0")),
            closed("USD_JPY", 400, 151.20, -20.0, None),
        ];

        let first = apply_closed_positions(&mut rows, &positions);
        assert_eq!(first.settled, 2);
        let snapshot: Vec<(f64, f64, f64)> = rows
            .iter()
            .map(|r| (r.profit, r.cumulative_profit, r.duration_min))
            .collect();

        // Same closed-position data again: nothing re-matches.
        let second = apply_closed_positions(&mut rows, &positions);
        assert_eq!(second.settled, 0);
        let after: Vec<(f64, f64, f64)> = rows
            .iter()
            .map(|r| (r.profit, r.cumulative_profit, r.duration_min))
            .collect();
        assert_eq!(snapshot, after);
    }

    /// Serves closed positions the way the broker adapter does: only
    /// those closed strictly after the requested lower bound.
    struct FixedPositions {
        positions: Vec<ClosedPosition>,
    }

    #[async_trait]
    impl PositionQuery for FixedPositions {
        async fn list_closed_positions(
            &self,
            since: DateTime<Utc>,
        ) -> Result<Vec<ClosedPosition>, BrokerError> {
            Ok(self
                .positions
                .iter()
                .filter(|p| p.close_time > since)
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn restart_settles_trades_closed_while_down() {
        // The pending row was opened at 09:00 and the broker closed the
        // trade at 10:30, both long before this process started. The
        // first pass must still pick it up.
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(&dir.path().join("trade_log.csv"));
        ledger.append(&pending_row(0, "EUR_USD", 2500, 1.1050)).unwrap();

        let positions = FixedPositions {
            positions: vec![closed("EUR_USD", 2500, 1.1050, 75.0, Some("EUR_USD_0"))],
        };
        let ledger = Arc::new(Mutex::new(ledger));
        let mut reconciler = Reconciler::new(Arc::clone(&ledger), Arc::new(positions));

        let summary = reconciler.run_once().await.unwrap();
        assert_eq!(summary.settled, 1);

        let rows = ledger.lock().await.load_rows().unwrap();
        assert_eq!(rows[0].profit, 75.0);
        assert!(!rows[0].is_pending());
    }

    #[tokio::test]
    async fn later_passes_only_scan_forward() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(&dir.path().join("trade_log.csv"));
        ledger.append(&pending_row(0, "EUR_USD", 2500, 1.1050)).unwrap();

        let positions = FixedPositions {
            positions: vec![closed("EUR_USD", 2500, 1.1050, 75.0, Some("EUR_USD_0"))],
        };
        let ledger = Arc::new(Mutex::new(ledger));
        let mut reconciler = Reconciler::new(Arc::clone(&ledger), Arc::new(positions));

        assert_eq!(reconciler.run_once().await.unwrap().settled, 1);
        // The close predates the second pass's lower bound, so nothing
        // is re-fetched or re-settled.
        assert_eq!(reconciler.run_once().await.unwrap(), ReconcileSummary::default());
    }

    #[test]
    fn cumulative_profit_reflows_in_time_order() {
        let mut rows = vec![
            pending_row(0, "EUR_USD", 2500, 1.1050),
            pending_row(1, "USD_JPY", 400, 151.20),
            pending_row(2, "EUR_USD", 1000, 1.1100),
        ];
        let positions = vec![
            closed("USD_JPY", 400, 151.20, -20.0, None),
            closed("EUR_USD", 1000, 1.1100, 35.0, None),
        ];

        apply_closed_positions(&mut rows, &positions);
        assert_eq!(rows[0].cumulative_profit, 0.0);
        assert_eq!(rows[1].cumulative_profit, -20.0);
        assert_eq!(rows[2].cumulative_profit, 15.0);
    }
}

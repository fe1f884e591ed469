/// Durable trade ledger: one CSV row per submitted order.
///
/// Append-only except for the single reconciliation mutation per row. New
/// rows are appended in place; settles go through a full rewrite of the
/// file via temp-then-rename, so a restart mid-update never leaves a
/// half-written ledger. Callers serialize access through a shared mutex —
/// the orchestrator only appends, the reconciler only settles.

pub mod reconciler;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::core::{EngineError, LedgerRow};

pub struct TradeLedger {
    path: PathBuf,
}

impl TradeLedger {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All rows in file order (which is submission-time order).
    /// A missing file is an empty ledger, not an error.
    pub fn load_rows(&self) -> Result<Vec<LedgerRow>, EngineError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut rows = Vec::new();
        for record in reader.deserialize() {
            rows.push(record?);
        }
        Ok(rows)
    }

    /// Appends one pending row, writing the header on first use.
    pub fn append(&self, row: &LedgerRow) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let fresh = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(fresh)
            .from_writer(file);
        writer.serialize(row)?;
        writer.flush()?;

        info!(
            client_trade_id = %row.client_trade_id,
            instrument = %row.instrument,
            units = row.units,
            "ledger row appended"
        );
        Ok(())
    }

    /// Replaces the whole file in one atomic rename. Used by the
    /// reconciler so each row update is a single committed write.
    pub fn rewrite(&self, rows: &[LedgerRow]) -> Result<(), EngineError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Prefix sum of `profit` in row order, written into `cumulative_profit`.
/// Recomputed whenever any row settles.
pub fn recompute_cumulative(rows: &mut [LedgerRow]) {
    let mut running = 0.0;
    for row in rows {
        running += row.profit;
        row.cumulative_profit = running;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Signal;
    use chrono::{Duration, TimeZone, Utc};

    pub(crate) fn sample_row(n: i64, instrument: &str, units: u64, price: f64) -> LedgerRow {
        let time = Utc.with_ymd_and_hms(2025, 2, 1, 9, 0, 0).unwrap() + Duration::minutes(n);
        LedgerRow {
            time,
            client_trade_id: format!("{}_{}", instrument, time.format("%Y%m%d%H%M%S")),
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

    #[test]
    fn append_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(&dir.path().join("trade_log.csv"));

        ledger.append(&sample_row(0, "EUR_USD", 2500, 1.1050)).unwrap();
        ledger.append(&sample_row(1, "USD_JPY", 400, 151.20)).unwrap();

        let rows = ledger.load_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].instrument, "EUR_USD");
        assert_eq!(rows[1].units, 400);
        assert!(rows[0].is_pending());
    }

    #[test]
    fn missing_file_is_an_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(&dir.path().join("trade_log.csv"));
        assert!(ledger.load_rows().unwrap().is_empty());
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = TradeLedger::new(&dir.path().join("trade_log.csv"));

        ledger.append(&sample_row(0, "EUR_USD", 2500, 1.1050)).unwrap();
        let mut rows = ledger.load_rows().unwrap();
        rows[0].profit = 42.0;
        rows[0].duration_min = 15.0;
        recompute_cumulative(&mut rows);
        ledger.rewrite(&rows).unwrap();

        let reloaded = ledger.load_rows().unwrap();
        assert_eq!(reloaded[0].profit, 42.0);
        assert_eq!(reloaded[0].cumulative_profit, 42.0);
        assert!(!reloaded[0].is_pending());
    }

    #[test]
    fn cumulative_profit_is_a_prefix_sum() {
        let mut rows = vec![
            sample_row(0, "EUR_USD", 100, 1.1),
            sample_row(1, "EUR_USD", 100, 1.1),
            sample_row(2, "EUR_USD", 100, 1.1),
        ];
        rows[0].profit = 100.0;
        rows[1].profit = -50.0;
        rows[2].profit = 30.0;
        recompute_cumulative(&mut rows);

        assert_eq!(rows[0].cumulative_profit, 100.0);
        assert_eq!(rows[1].cumulative_profit, 50.0);
        assert_eq!(rows[2].cumulative_profit, 80.0);
    }
}

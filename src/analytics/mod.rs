/// Performance analytics over the trade ledger.
///
/// Pure derivation: the ledger rows in, a report out. These numbers are
/// the only correctness oracle an operator sees, so nothing here mutates
/// state and every metric guards its degenerate case instead of emitting
/// a nonsensical ratio.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::core::{EngineError, LedgerRow};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceReport {
    pub generated_at: DateTime<Utc>,
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// 0 when there are no trades.
    pub win_rate_pct: f64,
    pub net_profit: f64,
    pub avg_profit: f64,
    pub avg_duration_min: f64,
    /// Most negative peak-relative dip of the cumulative-profit series.
    /// `None` until the running peak has been positive at least once.
    pub max_drawdown: Option<f64>,
}

/// Largest peak-relative decline of the cumulative-profit series.
///
/// Points where the running peak is zero or negative carry no meaningful
/// ratio and are skipped; a series that never reaches a positive peak has
/// no drawdown to report.
fn max_drawdown(rows: &[LedgerRow]) -> Option<f64> {
    let mut peak = f64::NEG_INFINITY;
    let mut worst: Option<f64> = None;

    for row in rows {
        let cum = row.cumulative_profit;
        if cum > peak {
            peak = cum;
        }
        if peak > 0.0 {
            let dip = (cum - peak) / peak;
            worst = Some(match worst {
                Some(w) if w < dip => w,
                _ => dip,
            });
        }
    }
    worst
}

/// Derives the full report from ledger rows in file order.
pub fn compute_metrics(rows: &[LedgerRow]) -> PerformanceReport {
    let total = rows.len();
    let wins = rows.iter().filter(|r| r.profit > 0.0).count();
    let losses = rows.iter().filter(|r| r.profit < 0.0).count();
    let net_profit: f64 = rows.iter().map(|r| r.profit).sum();
    let total_duration: f64 = rows.iter().map(|r| r.duration_min).sum();

    let (win_rate_pct, avg_profit, avg_duration_min) = if total == 0 {
        (0.0, 0.0, 0.0)
    } else {
        (
            wins as f64 / total as f64 * 100.0,
            net_profit / total as f64,
            total_duration / total as f64,
        )
    };

    PerformanceReport {
        generated_at: Utc::now(),
        total_trades: total,
        wins,
        losses,
        win_rate_pct,
        net_profit,
        avg_profit,
        avg_duration_min,
        max_drawdown: max_drawdown(rows),
    }
}

/// Writes one report as a single-row CSV under `results_dir`, named by
/// generation time so successive sessions never clobber each other.
pub fn save_report(report: &PerformanceReport, results_dir: &Path) -> Result<PathBuf, EngineError> {
    std::fs::create_dir_all(results_dir)?;
    let path = results_dir.join(format!(
        "session_{}.csv",
        report.generated_at.format("%Y%m%d%H%M%S")
    ));

    let mut writer = csv::Writer::from_path(&path)?;
    writer.serialize(report)?;
    writer.flush()?;

    info!(
        path = %path.display(),
        total_trades = report.total_trades,
        net_profit = report.net_profit,
        win_rate_pct = report.win_rate_pct,
        "session report saved"
    );
    Ok(path)
}

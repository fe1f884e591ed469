/// Pure indicator math over bar series.
///
/// Each function returns one value per input bar, `None` during warm-up.
/// Conventions follow the usual TA definitions: EMA seeded with the SMA of
/// the first n closes, RSI/ATR/ADX with Wilder smoothing, Bollinger bands
/// with population standard deviation.

use crate::core::Bar;

/// Exponential moving average. k = 2/(n+1), seeded with the first SMA.
/// Warm-up: first n-1 bars.
pub fn ema(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return values;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut prev = bars[..period].iter().map(|b| b.close).sum::<f64>() / period as f64;
    values[period - 1] = Some(prev);

    for i in period..bars.len() {
        prev = bars[i].close * k + prev * (1.0 - k);
        values[i] = Some(prev);
    }
    values
}

/// Relative strength index with Wilder smoothing of average gain/loss.
/// 100 when the average loss is zero. Warm-up: first n bars (n price
/// changes are needed for the initial averages).
pub fn rsi(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; bars.len()];
    if period == 0 || bars.len() <= period {
        return values;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = bars[i].close - bars[i - 1].close;
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    values[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    for i in (period + 1)..bars.len() {
        let change = bars[i].close - bars[i - 1].close;
        let gain = change.max(0.0);
        let loss = (-change).max(0.0);
        avg_gain = (avg_gain * (period - 1) as f64 + gain) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + loss) / period as f64;
        values[i] = Some(rsi_from_averages(avg_gain, avg_loss));
    }
    values
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

fn true_range(bar: &Bar, prev_close: f64) -> f64 {
    (bar.high - bar.low)
        .max((bar.high - prev_close).abs())
        .max((bar.low - prev_close).abs())
}

/// Average true range, Wilder-smoothed. First value at index n (the true
/// range needs the previous close).
pub fn atr(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; bars.len()];
    if period == 0 || bars.len() <= period {
        return values;
    }

    let mut prev = (1..=period)
        .map(|i| true_range(&bars[i], bars[i - 1].close))
        .sum::<f64>()
        / period as f64;
    values[period] = Some(prev);

    for i in (period + 1)..bars.len() {
        let tr = true_range(&bars[i], bars[i - 1].close);
        prev = (prev * (period - 1) as f64 + tr) / period as f64;
        values[i] = Some(prev);
    }
    values
}

/// Average directional index, Wilder-smoothed DX over +DI/-DI.
/// First value at index 2n-1.
pub fn adx(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; bars.len()];
    if period == 0 || bars.len() < 2 * period {
        return values;
    }

    // Smoothed TR and directional movement, Wilder running sums.
    let mut smooth_tr = 0.0;
    let mut smooth_plus = 0.0;
    let mut smooth_minus = 0.0;
    let mut dx_sum = 0.0;
    let mut adx_prev = 0.0;

    for i in 1..bars.len() {
        let up = bars[i].high - bars[i - 1].high;
        let down = bars[i - 1].low - bars[i].low;
        let plus_dm = if up > down && up > 0.0 { up } else { 0.0 };
        let minus_dm = if down > up && down > 0.0 { down } else { 0.0 };
        let tr = true_range(&bars[i], bars[i - 1].close);

        if i <= period {
            smooth_tr += tr;
            smooth_plus += plus_dm;
            smooth_minus += minus_dm;
            if i < period {
                continue;
            }
        } else {
            smooth_tr = smooth_tr - smooth_tr / period as f64 + tr;
            smooth_plus = smooth_plus - smooth_plus / period as f64 + plus_dm;
            smooth_minus = smooth_minus - smooth_minus / period as f64 + minus_dm;
        }

        let dx = if smooth_tr == 0.0 {
            0.0
        } else {
            let plus_di = 100.0 * smooth_plus / smooth_tr;
            let minus_di = 100.0 * smooth_minus / smooth_tr;
            let di_sum = plus_di + minus_di;
            if di_sum == 0.0 {
                0.0
            } else {
                100.0 * (plus_di - minus_di).abs() / di_sum
            }
        };

        if i < 2 * period - 1 {
            dx_sum += dx;
        } else if i == 2 * period - 1 {
            dx_sum += dx;
            adx_prev = dx_sum / period as f64;
            values[i] = Some(adx_prev);
        } else {
            adx_prev = (adx_prev * (period - 1) as f64 + dx) / period as f64;
            values[i] = Some(adx_prev);
        }
    }
    values
}

/// Bollinger bands: SMA ± deviation × population stddev.
/// Warm-up: first n-1 bars. Returns (upper, lower) per bar.
pub fn bollinger(bars: &[Bar], period: usize, deviation: f64) -> Vec<Option<(f64, f64)>> {
    let mut values = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return values;
    }

    for i in (period - 1)..bars.len() {
        let window = &bars[i + 1 - period..=i];
        let mean = window.iter().map(|b| b.close).sum::<f64>() / period as f64;
        let variance = window
            .iter()
            .map(|b| {
                let d = b.close - mean;
                d * d
            })
            .sum::<f64>()
            / period as f64;
        let stddev = variance.sqrt();
        values[i] = Some((mean + deviation * stddev, mean - deviation * stddev));
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_bars(closes: &[f64]) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                instrument: "EUR_USD".to_string(),
                time: start + Duration::minutes(i as i64),
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn ema_seed_is_sma_then_recursive() {
        let bars = make_bars(&[10.0, 20.0, 30.0, 40.0]);
        let series = ema(&bars, 3);

        assert!(series[0].is_none());
        assert!(series[1].is_none());
        assert_eq!(series[2], Some(20.0));

        let k = 2.0 / 4.0;
        let expected = 40.0 * k + 20.0 * (1.0 - k);
        assert!((series[3].unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn ema_too_short_is_all_none() {
        let bars = make_bars(&[10.0, 20.0]);
        assert!(ema(&bars, 5).iter().all(Option::is_none));
    }

    #[test]
    fn rsi_warmup_and_bounds() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + ((i * 7) % 5) as f64).collect();
        let bars = make_bars(&closes);
        let series = rsi(&bars, 14);

        for v in &series[..14] {
            assert!(v.is_none());
        }
        for v in series[14..].iter().flatten() {
            assert!((0.0..=100.0).contains(v));
        }
    }

    #[test]
    fn rsi_is_100_on_monotone_gains() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let bars = make_bars(&closes);
        let series = rsi(&bars, 14);
        assert_eq!(series[14], Some(100.0));
    }

    #[test]
    fn atr_of_constant_range_bars() {
        // Every bar spans exactly 1.0 with unchanged closes, so TR is
        // constant and Wilder smoothing holds it there.
        let bars = make_bars(&[100.0; 20]);
        let series = atr(&bars, 14);
        assert!(series[13].is_none());
        for v in series[14..].iter().flatten() {
            assert!((v - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn adx_warmup_boundary() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64) * 0.3).collect();
        let bars = make_bars(&closes);
        let series = adx(&bars, 14);

        for v in &series[..27] {
            assert!(v.is_none());
        }
        assert!(series[27].is_some());
        // Steady uptrend: directional movement is one-sided, ADX high.
        assert!(series[39].unwrap() > 25.0);
    }

    #[test]
    fn bollinger_bands_bracket_the_mean() {
        let bars = make_bars(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let series = bollinger(&bars, 3, 2.0);

        assert!(series[1].is_none());
        let (upper, lower) = series[2].unwrap();
        let mean = 2.0;
        assert!(upper > mean && lower < mean);
        assert!((upper - mean - (mean - lower)).abs() < 1e-12);
    }
}

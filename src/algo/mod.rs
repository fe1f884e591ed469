/// Indicator and signal engine: bar series in, categorical signal out.

pub mod indicators;
pub mod signal;

pub use signal::{compute_indicators, generate_signal, IndicatorFrame, IndicatorRow};

/// Direction filter: a pretrained classifier used as a confirmation gate.
///
/// The core only depends on the `DirectionFilter` trait. The concrete
/// implementation is a frozen linear softmax classifier over a fixed-length
/// window of min-max-scaled OHLCV features, loaded once at startup from a
/// versioned JSON artifact that carries its scaling parameters. Training
/// lives outside this crate; absence of the artifact is the documented
/// `ModelUnavailable` degraded mode and the orchestrator then treats every
/// signal as rejected-by-filter.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{Bar, EngineError, Signal};

pub const FEATURES_PER_BAR: usize = 5;

/// Classes in artifact order; index is the argmax position.
const CLASSES: [Signal; 3] = [Signal::Hold, Signal::Buy, Signal::Sell];

/// Confirmation gate over a fixed-length window of recent bars.
///
/// Implementations must be stateless from the caller's perspective:
/// identical input windows always yield identical output.
pub trait DirectionFilter: Send + Sync {
    /// Minimum number of bars `predict` requires.
    fn required_window(&self) -> usize;

    /// Predicted direction for the most recent `required_window` bars.
    /// Fails with `InsufficientWindow` when fewer are supplied.
    fn predict(&self, window: &[Bar]) -> Result<Signal, EngineError>;
}

/// Serialized model artifact: scaling parameters plus per-class weights
/// over the flattened window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelArtifact {
    version: u32,
    look_back: usize,
    feature_min: [f64; FEATURES_PER_BAR],
    feature_max: [f64; FEATURES_PER_BAR],
    /// One weight vector per class, each `look_back * FEATURES_PER_BAR` long.
    weights: Vec<Vec<f64>>,
    bias: [f64; 3],
}

/// Frozen linear classifier behind the `DirectionFilter` seam.
pub struct LinearDirectionModel {
    artifact: ModelArtifact,
}

impl LinearDirectionModel {
    /// Loads and validates the artifact. Any missing file, parse failure,
    /// or dimension mismatch is `ModelUnavailable` — the caller decides
    /// whether to block trading or run with the gate closed.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::ModelUnavailable(format!("{}: {e}", path.display()))
        })?;
        let artifact: ModelArtifact = serde_json::from_str(&content).map_err(|e| {
            EngineError::ModelUnavailable(format!("{}: {e}", path.display()))
        })?;

        let expected = artifact.look_back * FEATURES_PER_BAR;
        if artifact.look_back == 0
            || artifact.weights.len() != CLASSES.len()
            || artifact.weights.iter().any(|w| w.len() != expected)
        {
            return Err(EngineError::ModelUnavailable(format!(
                "{}: malformed weight matrix",
                path.display()
            )));
        }

        info!(
            path = %path.display(),
            version = artifact.version,
            look_back = artifact.look_back,
            "direction model loaded"
        );
        Ok(Self { artifact })
    }

    fn features(bar: &Bar) -> [f64; FEATURES_PER_BAR] {
        [bar.open, bar.high, bar.low, bar.close, bar.volume]
    }

    fn scale(&self, feature_idx: usize, value: f64) -> f64 {
        let min = self.artifact.feature_min[feature_idx];
        let max = self.artifact.feature_max[feature_idx];
        let span = max - min;
        if span == 0.0 {
            0.0
        } else {
            (value - min) / span
        }
    }
}

impl DirectionFilter for LinearDirectionModel {
    fn required_window(&self) -> usize {
        self.artifact.look_back
    }

    fn predict(&self, window: &[Bar]) -> Result<Signal, EngineError> {
        let look_back = self.artifact.look_back;
        if window.len() < look_back {
            return Err(EngineError::InsufficientWindow {
                required: look_back,
                got: window.len(),
            });
        }

        let recent = &window[window.len() - look_back..];
        let mut inputs = Vec::with_capacity(look_back * FEATURES_PER_BAR);
        for bar in recent {
            for (idx, value) in Self::features(bar).into_iter().enumerate() {
                inputs.push(self.scale(idx, value));
            }
        }

        let mut best = 0;
        let mut best_score = f64::NEG_INFINITY;
        for (class, weights) in self.artifact.weights.iter().enumerate() {
            let score: f64 = self.artifact.bias[class]
                + weights.iter().zip(&inputs).map(|(w, x)| w * x).sum::<f64>();
            // Ties resolve to the lowest class index (Hold first).
            if score > best_score {
                best_score = score;
                best = class;
            }
        }
        Ok(CLASSES[best])
    }
}

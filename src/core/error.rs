/// Error taxonomy for the decision-and-execution pipeline.
///
/// Policy summary: data/window shortfalls and zero-size outcomes terminate
/// the current decision cycle only; transient network errors are retried
/// with backoff and surface as `MaxRetriesExceeded`; reconciliation
/// ambiguity is logged and left pending; persistence failures are fatal to
/// the cycle that hit them.

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("insufficient history: need {required} bars, got {got}")]
    InsufficientHistory { required: usize, got: usize },

    #[error("insufficient window: direction filter needs {required} bars, got {got}")]
    InsufficientWindow { required: usize, got: usize },

    #[error("direction model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("insufficient funds: requested {requested:.2}, available {available:.2}")]
    InsufficientFunds { requested: f64, available: f64 },

    #[error("a trading session is already open")]
    SessionAlreadyOpen,

    #[error("no open session to settle")]
    NoOpenSession,

    #[error("computed position size rounds to zero")]
    ZeroSize,

    #[error("order submission failed after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    #[error("reconciliation ambiguous for {instrument}: {candidates} candidate rows")]
    ReconciliationAmbiguous {
        instrument: String,
        candidates: usize,
    },

    #[error("transient network error: {0}")]
    Transient(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<csv::Error> for EngineError {
    fn from(e: csv::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Persistence(e.to_string())
    }
}

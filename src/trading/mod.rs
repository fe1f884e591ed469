//! Decision-cycle machinery: retry policy and the order orchestrator.

pub mod orchestrator;
pub mod retry;

pub use orchestrator::{pip_value, position_units, CycleOutcome, CycleStats, OrderOrchestrator};
pub use retry::{retry_with_backoff, RetryError, RetryPolicy};

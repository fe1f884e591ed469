/// External collaborator seams for market data, order submission, and
/// closed-position queries. The core only sees these traits; the REST
/// adapter lives in `rest.rs`.

pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::{Bar, ClosedPosition, SubmitOutcome, TradeIntent};

#[derive(thiserror::Error, Debug)]
pub enum BrokerError {
    /// Network-level failure worth retrying with backoff.
    #[error("transient broker error: {0}")]
    Transient(String),

    #[error("broker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected broker response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait MarketData: Send + Sync {
    /// Most recent `count` complete bars for one instrument, oldest first.
    async fn fetch_bars(&self, instrument: &str, count: usize) -> Result<Vec<Bar>, BrokerError>;
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submits a market order. At-least-once on the wire; the broker
    /// deduplicates on `client_trade_id`, so retrying a lost confirmation
    /// with the same intent is safe.
    async fn submit(&self, intent: &TradeIntent) -> Result<SubmitOutcome, BrokerError>;
}

#[async_trait]
pub trait PositionQuery: Send + Sync {
    /// Closed positions reported by the broker since the given time.
    async fn list_closed_positions(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClosedPosition>, BrokerError>;
}

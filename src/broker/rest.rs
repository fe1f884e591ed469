/// REST adapter for an OANDA-style v20 broker API.
///
/// Covers the three collaborator contracts the core needs: candle fetch,
/// market-order submission with a client-extensions id, and closed-trade
/// listing. When the candle feed only returns bid/ask quotes, all four OHLC
/// fields carry the mid-price — a documented degraded mode, not a silently
/// wrong one.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broker::{BrokerError, MarketData, OrderGateway, PositionQuery};
use crate::core::{Bar, ClosedPosition, Signal, SubmitOutcome, TradeIntent};

/// Per-request cap; a hung broker connection must fail, not stall the
/// decision cycle.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RestBrokerClient {
    client: Client,
    api_url: String,
    account_id: String,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    candles: Vec<Candle>,
}

#[derive(Debug, Deserialize)]
struct Candle {
    time: DateTime<Utc>,
    complete: bool,
    volume: f64,
    mid: Option<CandlePrices>,
    bid: Option<CandlePrices>,
    ask: Option<CandlePrices>,
}

#[derive(Debug, Deserialize)]
struct CandlePrices {
    o: String,
    h: String,
    l: String,
    c: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequest<'a> {
    order: OrderBody<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderBody<'a> {
    instrument: &'a str,
    units: String,
    #[serde(rename = "type")]
    order_type: &'static str,
    position_fill: &'static str,
    stop_loss_on_fill: PriceField,
    take_profit_on_fill: PriceField,
    client_extensions: ClientExtensions<'a>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PriceField {
    price: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClientExtensions<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_fill_transaction: Option<FillTransaction>,
    order_cancel_transaction: Option<CancelTransaction>,
    order_reject_transaction: Option<CancelTransaction>,
}

#[derive(Debug, Deserialize)]
struct FillTransaction {
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelTransaction {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TradesResponse {
    trades: Vec<BrokerTrade>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BrokerTrade {
    instrument: String,
    initial_units: String,
    /// Fill price at open; the reconciler's fallback match key.
    price: String,
    realized_pl: String,
    open_time: DateTime<Utc>,
    close_time: Option<DateTime<Utc>>,
    client_extensions: Option<OwnedClientExtensions>,
}

#[derive(Debug, Deserialize)]
struct OwnedClientExtensions {
    id: String,
}

impl RestBrokerClient {
    pub fn new(
        api_url: String,
        account_id: String,
        api_token: String,
    ) -> Result<Self, BrokerError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_url,
            account_id,
            api_token,
        })
    }

    fn parse_price(raw: &str) -> Result<f64, BrokerError> {
        raw.parse::<f64>()
            .map_err(|_| BrokerError::Malformed(format!("unparseable price: {raw}")))
    }

    fn bar_from_candle(instrument: &str, candle: &Candle) -> Result<Bar, BrokerError> {
        if let Some(mid) = &candle.mid {
            return Ok(Bar {
                instrument: instrument.to_string(),
                time: candle.time,
                open: Self::parse_price(&mid.o)?,
                high: Self::parse_price(&mid.h)?,
                low: Self::parse_price(&mid.l)?,
                close: Self::parse_price(&mid.c)?,
                volume: candle.volume,
            });
        }

        // Degraded mode: only bid/ask quotes available, collapse to the
        // mid-price of the closes.
        if let (Some(bid), Some(ask)) = (&candle.bid, &candle.ask) {
            let mid_close = (Self::parse_price(&bid.c)? + Self::parse_price(&ask.c)?) / 2.0;
            warn!(instrument, "no mid candle prices, deriving OHLC from bid/ask mid");
            return Ok(Bar {
                instrument: instrument.to_string(),
                time: candle.time,
                open: mid_close,
                high: mid_close,
                low: mid_close,
                close: mid_close,
                volume: candle.volume,
            });
        }

        Err(BrokerError::Malformed(
            "candle carries neither mid nor bid/ask prices".to_string(),
        ))
    }
}

#[async_trait]
impl MarketData for RestBrokerClient {
    async fn fetch_bars(&self, instrument: &str, count: usize) -> Result<Vec<Bar>, BrokerError> {
        let url = format!("{}/v3/instruments/{}/candles", self.api_url, instrument);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .query(&[
                ("count", count.to_string()),
                ("granularity", "M1".to_string()),
                ("price", "MBA".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: CandleResponse = response.json().await?;
        let bars = body
            .candles
            .iter()
            .filter(|c| c.complete)
            .map(|c| Self::bar_from_candle(instrument, c))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(instrument, bars = bars.len(), "fetched candles");
        Ok(bars)
    }
}

#[async_trait]
impl OrderGateway for RestBrokerClient {
    async fn submit(&self, intent: &TradeIntent) -> Result<SubmitOutcome, BrokerError> {
        let signed_units = match intent.direction {
            Signal::Sell => format!("-{}", intent.units),
            _ => intent.units.to_string(),
        };
        let request = OrderRequest {
            order: OrderBody {
                instrument: &intent.instrument,
                units: signed_units,
                order_type: "MARKET",
                position_fill: "DEFAULT",
                stop_loss_on_fill: PriceField {
                    price: format!("{:.5}", intent.stop_loss),
                },
                take_profit_on_fill: PriceField {
                    price: format!("{:.5}", intent.take_profit),
                },
                client_extensions: ClientExtensions {
                    id: &intent.client_trade_id,
                },
            },
        };

        let url = format!("{}/v3/accounts/{}/orders", self.api_url, self.account_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&request)
            .send()
            .await?;

        if response.status().is_server_error() {
            return Err(BrokerError::Transient(format!(
                "order endpoint returned {}",
                response.status()
            )));
        }

        let body: OrderResponse = response.json().await?;
        if let Some(fill) = body.order_fill_transaction {
            return Ok(SubmitOutcome::Filled {
                fill_price: Self::parse_price(&fill.price)?,
            });
        }
        let reason = body
            .order_cancel_transaction
            .or(body.order_reject_transaction)
            .and_then(|t| t.reason)
            .unwrap_or_else(|| "no fill transaction in response".to_string());
        Ok(SubmitOutcome::Rejected { reason })
    }
}

#[async_trait]
impl PositionQuery for RestBrokerClient {
    async fn list_closed_positions(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ClosedPosition>, BrokerError> {
        let url = format!("{}/v3/accounts/{}/trades", self.api_url, self.account_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .query(&[("state", "CLOSED")])
            .send()
            .await?
            .error_for_status()?;

        let body: TradesResponse = response.json().await?;
        let mut positions = Vec::new();
        for trade in body.trades {
            let Some(close_time) = trade.close_time else {
                continue;
            };
            if close_time <= since {
                continue;
            }
            let units = trade
                .initial_units
                .parse::<f64>()
                .map_err(|_| {
                    BrokerError::Malformed(format!("unparseable units: {}", trade.initial_units))
                })?
                .abs() as u64;
            let entry_price = Self::parse_price(&trade.price)?;
            positions.push(ClosedPosition {
                instrument: trade.instrument,
                units,
                entry_price,
                realized_pnl: Self::parse_price(&trade.realized_pl)?,
                open_time: trade.open_time,
                close_time,
                client_trade_id: trade.client_extensions.map(|e| e.id),
            });
        }

        debug!(positions = positions.len(), "fetched closed positions");
        Ok(positions)
    }
}

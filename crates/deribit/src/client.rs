//! Typed RPC calls over one request/response session.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use strangle_core::{
    AccountGateway, AccountSnapshot, BotError, Instrument, OptionKind, OrderAck, OrderGateway,
    OrderSide, Position, Result, RunFlag, Strike, VenueEndpoint,
};

use crate::codec::require;
use crate::session::Session;

/// Request/response client for everything that is not a stream: instrument
/// listing, spot fetch, order submission, account state.
pub struct DeribitClient {
    session: Session,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct RawInstrument {
    instrument_name: String,
    strike: f64,
    option_type: String,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    instrument_name: String,
    size: f64,
    #[serde(default)]
    label: Option<String>,
}

/// A resting trigger order, as listed by the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct StopOrder {
    pub order_id: String,
    pub trigger_price: f64,
    pub amount: f64,
}

impl DeribitClient {
    /// Opens and authenticates a fresh connection.
    ///
    /// # Errors
    ///
    /// Propagates transport and auth failures from the session.
    pub async fn connect(
        endpoint: &VenueEndpoint,
        run: RunFlag,
        currency: String,
        max_reconnect_attempts: u32,
        reconnect_delay: Duration,
    ) -> Result<Self> {
        let mut session = Session::new(endpoint, run, max_reconnect_attempts, reconnect_delay);
        session.connect_and_auth().await?;
        Ok(Self { session, currency })
    }

    /// One RPC round-trip. A transport-level failure runs the session's
    /// bounded reconnect and retries once, so a dropped connection either
    /// heals here or escalates `ConnectionExhausted` instead of failing
    /// every later call with a dead socket.
    async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        match self.session.request(method, params.clone()).await {
            Err(BotError::Transport(reason)) => {
                tracing::warn!(%method, %reason, "request lost its transport, reconnecting");
                self.session.reconnect().await?;
                self.session.request(method, params).await
            }
            other => other,
        }
    }

    /// Unexpired option listing for the configured currency.
    ///
    /// # Errors
    ///
    /// Propagates RPC errors; malformed instrument names are skipped with a
    /// warning rather than failing the listing.
    pub async fn get_instruments(&mut self) -> Result<Vec<Instrument>> {
        let result = self
            .call(
                "public/get_instruments",
                json!({
                    "currency": self.currency,
                    "kind": "option",
                    "expired": false,
                }),
            )
            .await?;

        let raw: Vec<RawInstrument> = serde_json::from_value(result)?;
        let mut instruments = Vec::with_capacity(raw.len());
        for item in raw {
            match parse_option_name(&item.instrument_name) {
                Some((expiry_tag, _, _)) => {
                    let kind = match item.option_type.as_str() {
                        "put" => OptionKind::Put,
                        "call" => OptionKind::Call,
                        other => {
                            tracing::warn!(instrument = %item.instrument_name, option_type = other, "unknown option type, skipped");
                            continue;
                        }
                    };
                    instruments.push(Instrument {
                        name: item.instrument_name,
                        strike: Strike::from_venue(item.strike),
                        kind,
                        expiry_tag,
                    });
                }
                None => {
                    tracing::warn!(instrument = %item.instrument_name, "unparseable instrument name, skipped");
                }
            }
        }
        Ok(instruments)
    }

    /// Current index (spot) price for `<ccy>_usd`.
    ///
    /// # Errors
    ///
    /// Propagates RPC errors and malformed payloads.
    pub async fn get_index_price(&mut self) -> Result<f64> {
        let result = self
            .call(
                "public/get_index_price",
                json!({ "index_name": format!("{}_usd", self.currency.to_lowercase()) }),
            )
            .await?;
        require(&result, "index_price")?
            .as_f64()
            .ok_or_else(|| BotError::Payload("index_price is not a number".into()))
    }

    /// Cancels every resting order, hedge stops included.
    ///
    /// # Errors
    ///
    /// Propagates RPC errors.
    pub async fn cancel_all(&mut self) -> Result<()> {
        self.call("private/cancel_all", json!({})).await?;
        Ok(())
    }

    /// Resting stop orders on one instrument, used to reseed hedge
    /// bookkeeping after a mid-cycle restart.
    ///
    /// # Errors
    ///
    /// Propagates RPC errors and malformed payloads.
    pub async fn open_stop_orders(&mut self, instrument: &str) -> Result<Vec<StopOrder>> {
        let result = self
            .call(
                "private/get_open_orders_by_instrument",
                json!({ "instrument_name": instrument, "type": "stop_market" }),
            )
            .await?;
        parse_stop_orders(&result)
    }

    /// Graceful unsubscribe-and-close.
    pub async fn close(&mut self) {
        self.session.close().await;
    }

    async fn order_request(&mut self, method: &str, params: Value) -> Result<OrderAck> {
        let result = self.call(method, params).await?;
        parse_order_ack(&result)
    }
}

/// The venue reports order ids as strings for options and ints elsewhere.
fn order_id_string(order: &Value) -> Option<String> {
    order
        .get("order_id")?
        .as_str()
        .map(String::from)
        .or_else(|| order.get("order_id").and_then(Value::as_i64).map(|v| v.to_string()))
}

fn parse_order_ack(result: &Value) -> Result<OrderAck> {
    let order = require(result, "order")?;
    require(order, "order_id")?;
    let order_id = order_id_string(order)
        .ok_or_else(|| BotError::Payload("order_id is neither string nor int".into()))?;
    Ok(OrderAck {
        order_id,
        order_state: order
            .get("order_state")
            .and_then(Value::as_str)
            .unwrap_or("open")
            .to_string(),
        filled_amount: order
            .get("filled_amount")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
    })
}

fn parse_stop_orders(result: &Value) -> Result<Vec<StopOrder>> {
    let orders = result
        .as_array()
        .ok_or_else(|| BotError::Payload("open-order listing is not an array".into()))?;
    let mut stops = Vec::with_capacity(orders.len());
    for order in orders {
        let Some(order_id) = order_id_string(order) else {
            tracing::warn!(order = %order, "open order without an id, skipped");
            continue;
        };
        // Older API revisions call the trigger `stop_price`.
        let trigger_price = order
            .get("trigger_price")
            .or_else(|| order.get("stop_price"))
            .and_then(Value::as_f64);
        let amount = order.get("amount").and_then(Value::as_f64);
        match (trigger_price, amount) {
            (Some(trigger_price), Some(amount)) => {
                stops.push(StopOrder { order_id, trigger_price, amount });
            }
            _ => tracing::warn!(%order_id, "open order without trigger or amount, skipped"),
        }
    }
    Ok(stops)
}

/// Splits a venue option name like `BTC-30AUG26-25000-P` into its expiry
/// tag, strike and side. Returns `None` for futures and malformed names.
#[must_use]
pub fn parse_option_name(name: &str) -> Option<(String, Strike, OptionKind)> {
    let mut parts = name.split('-');
    let _ccy = parts.next()?;
    let expiry = parts.next()?;
    let strike: i64 = parts.next()?.parse().ok()?;
    let kind = match parts.next()? {
        "P" => OptionKind::Put,
        "C" => OptionKind::Call,
        _ => return None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((expiry.to_string(), Strike(strike), kind))
}

#[async_trait]
impl OrderGateway for DeribitClient {
    async fn sell_limit(
        &mut self,
        instrument: &str,
        amount: f64,
        price: f64,
        label: &str,
    ) -> Result<OrderAck> {
        self.order_request(
            "private/sell",
            json!({
                "instrument_name": instrument,
                "amount": amount,
                "type": "limit",
                "price": price,
                "label": label,
            }),
        )
        .await
    }

    async fn place_stop(
        &mut self,
        instrument: &str,
        side: OrderSide,
        amount: f64,
        trigger_price: f64,
        label: &str,
    ) -> Result<OrderAck> {
        self.order_request(
            &format!("private/{}", side.as_method_suffix()),
            json!({
                "instrument_name": instrument,
                "amount": amount,
                "type": "stop_market",
                "trigger": "index_price",
                "trigger_price": trigger_price,
                "label": label,
            }),
        )
        .await
    }

    async fn edit_order(
        &mut self,
        order_id: &str,
        amount: f64,
        trigger_price: f64,
    ) -> Result<OrderAck> {
        self.order_request(
            "private/edit",
            json!({
                "order_id": order_id,
                "amount": amount,
                "trigger_price": trigger_price,
            }),
        )
        .await
    }

    async fn close_position(&mut self, instrument: &str, price: f64) -> Result<()> {
        self.call(
            "private/close_position",
            json!({
                "instrument_name": instrument,
                "type": "limit",
                "price": price,
            }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AccountGateway for DeribitClient {
    async fn account_summary(&mut self) -> Result<AccountSnapshot> {
        let result = self
            .call(
                "private/get_account_summary",
                json!({ "currency": self.currency }),
            )
            .await?;
        let equity = require(&result, "equity")?
            .as_f64()
            .ok_or_else(|| BotError::Payload("equity is not a number".into()))?;
        let available_funds = require(&result, "available_funds")?
            .as_f64()
            .ok_or_else(|| BotError::Payload("available_funds is not a number".into()))?;
        Ok(AccountSnapshot { equity, available_funds })
    }

    async fn open_positions(&mut self) -> Result<Vec<Position>> {
        let result = self
            .call(
                "private/get_positions",
                json!({ "currency": self.currency, "kind": "option" }),
            )
            .await?;

        let raw: Vec<RawPosition> = serde_json::from_value(result)?;
        let mut positions = Vec::new();
        for item in raw {
            if item.size == 0.0 {
                continue;
            }
            let Some((_, strike, kind)) = parse_option_name(&item.instrument_name) else {
                tracing::warn!(instrument = %item.instrument_name, "position with unparseable name, skipped");
                continue;
            };
            positions.push(Position {
                instrument_name: item.instrument_name,
                strike,
                kind,
                size: item.size.abs(),
                label: item.label.filter(|l| !l.is_empty()),
            });
        }
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_put_and_call_names() {
        let (expiry, strike, kind) = parse_option_name("BTC-30AUG26-25000-P").unwrap();
        assert_eq!(expiry, "30AUG26");
        assert_eq!(strike, Strike(25000));
        assert_eq!(kind, OptionKind::Put);

        let (_, _, kind) = parse_option_name("ETH-1SEP26-2400-C").unwrap();
        assert_eq!(kind, OptionKind::Call);
    }

    #[test]
    fn rejects_futures_and_garbage() {
        assert!(parse_option_name("BTC-PERPETUAL").is_none());
        assert!(parse_option_name("BTC-30AUG26-25000-X").is_none());
        assert!(parse_option_name("BTC-30AUG26-25000-P-extra").is_none());
        assert!(parse_option_name("").is_none());
    }

    #[test]
    fn order_ack_from_string_and_int_ids() {
        let by_string = json!({ "order": {
            "order_id": "ETH-584849853",
            "order_state": "filled",
            "filled_amount": 0.2,
        }});
        let ack = parse_order_ack(&by_string).unwrap();
        assert_eq!(ack.order_id, "ETH-584849853");
        assert!(ack.is_filled());

        let by_int = json!({ "order": { "order_id": 42, "order_state": "open" }});
        let ack = parse_order_ack(&by_int).unwrap();
        assert_eq!(ack.order_id, "42");
        assert!(!ack.is_filled());
    }

    #[test]
    fn order_ack_requires_order_envelope() {
        assert!(parse_order_ack(&json!({ "trades": [] })).is_err());
    }

    #[test]
    fn stop_orders_parse_both_trigger_field_names() {
        let listing = json!([
            { "order_id": "h-1", "trigger_price": 25000.0, "amount": 2500.0 },
            { "order_id": 77, "stop_price": 27000.0, "amount": 2700.0 },
            { "order_id": "h-3", "amount": 100.0 },
        ]);
        let stops = parse_stop_orders(&listing).unwrap();
        assert_eq!(
            stops,
            vec![
                StopOrder { order_id: "h-1".into(), trigger_price: 25000.0, amount: 2500.0 },
                StopOrder { order_id: "77".into(), trigger_price: 27000.0, amount: 2700.0 },
            ]
        );
    }

    #[test]
    fn stop_orders_reject_non_array_payload() {
        assert!(parse_stop_orders(&json!({ "orders": [] })).is_err());
    }
}

//! Long-running stream tasks feeding the market store.
//!
//! Each task owns its session and reconnect loop; all of them observe the
//! run flag at every iteration boundary and exit without raising when the
//! orchestrator flips it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;

use strangle_core::{Instrument, MarketStore, Quote, Result, RunFlag, VenueEndpoint};

use crate::session::{Session, StreamEvent};

/// Connection bounds shared by every stream task.
#[derive(Debug, Clone, Copy)]
pub struct StreamLimits {
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

/// Streams `deribit_price_index.<ccy>_usd` into the store.
///
/// # Errors
///
/// Returns a fatal error when authentication is rejected or the reconnect
/// budget is exhausted.
pub async fn price_index_stream(
    endpoint: VenueEndpoint,
    run: RunFlag,
    store: Arc<MarketStore>,
    channel: String,
    limits: StreamLimits,
) -> Result<()> {
    run_stream(endpoint, run, channel, limits, |data| {
        let store = Arc::clone(&store);
        async move {
            if let Some(price) = data.get("price").and_then(Value::as_f64) {
                tracing::trace!(price, "index price push");
                store.set_index_price(price).await;
            }
        }
    })
    .await
}

/// Streams `deribit_volatility_index.<ccy>_usd` (DVOL) into the store.
///
/// # Errors
///
/// Same failure modes as [`price_index_stream`].
pub async fn volatility_stream(
    endpoint: VenueEndpoint,
    run: RunFlag,
    store: Arc<MarketStore>,
    channel: String,
    limits: StreamLimits,
) -> Result<()> {
    run_stream(endpoint, run, channel, limits, |data| {
        let store = Arc::clone(&store);
        async move {
            if let Some(dvol) = data.get("volatility").and_then(Value::as_f64) {
                store.set_volatility(dvol).await;
            }
        }
    })
    .await
}

/// Streams `ticker.<instrument>.raw` for one leg into the store. Every push
/// replaces the whole quote for that strike/side.
///
/// # Errors
///
/// Same failure modes as [`price_index_stream`].
pub async fn ticker_stream(
    endpoint: VenueEndpoint,
    run: RunFlag,
    store: Arc<MarketStore>,
    instrument: Instrument,
    limits: StreamLimits,
) -> Result<()> {
    let channel = format!("ticker.{}.raw", instrument.name);
    tracing::info!(instrument = %instrument.name, "ticker listener starting");

    let strike = instrument.strike;
    let kind = instrument.kind;
    let result = run_stream(endpoint, run, channel, limits, |data| {
        let store = Arc::clone(&store);
        async move {
            let quote = parse_ticker(&data);
            store.upsert_quote(strike, kind, quote).await;
        }
    })
    .await;

    tracing::info!(instrument = %instrument.name, "ticker listener ended");
    result
}

async fn run_stream<F, Fut>(
    endpoint: VenueEndpoint,
    run: RunFlag,
    channel: String,
    limits: StreamLimits,
    mut on_push: F,
) -> Result<()>
where
    F: FnMut(Value) -> Fut + Send,
    Fut: std::future::Future<Output = ()> + Send,
{
    let mut session = Session::new(
        &endpoint,
        run.clone(),
        limits.max_reconnect_attempts,
        limits.reconnect_delay,
    );
    session.connect_and_auth().await?;
    session.subscribe(std::slice::from_ref(&channel)).await?;

    while run.is_running() {
        match session.recv_notification().await? {
            StreamEvent::Push { data, .. } => on_push(data).await,
            StreamEvent::Disconnected => {
                if !run.is_running() {
                    break;
                }
                tracing::info!(%channel, "stream dropped, reconnecting");
                session.reconnect().await?;
            }
        }
    }

    session.close().await;
    Ok(())
}

/// Builds a [`Quote`] from one raw ticker push. Non-positive best prices
/// mean no resting liquidity and map to `NaN`.
#[must_use]
pub fn parse_ticker(data: &Value) -> Quote {
    let price_or_nan = |field: &str| {
        data.get(field)
            .and_then(Value::as_f64)
            .filter(|p| *p > 0.0)
            .unwrap_or(f64::NAN)
    };
    let greek = |field: &str| {
        data.get("greeks")
            .and_then(|g| g.get(field))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    };

    Quote {
        bid: price_or_nan("best_bid_price"),
        ask: price_or_nan("best_ask_price"),
        bid_size: data.get("best_bid_amount").and_then(Value::as_f64).unwrap_or(0.0),
        ask_size: data.get("best_ask_amount").and_then(Value::as_f64).unwrap_or(0.0),
        delta: greek("delta"),
        gamma: greek("gamma"),
        vega: greek("vega"),
        rho: greek("rho"),
        updated_at: Utc::now(),
    }
}

//! Breach unwind: buy back short legs whose strike the index has crossed.

use std::sync::Arc;
use std::time::Duration;

use strangle_core::{MarketStore, OrderGateway, Position, Result, RunFlag};
use tracing::{info, warn};

use crate::positions::PositionBook;

/// Watches the index and closes any breached leg at the current ask.
///
/// A leg that fails to close for a transient reason goes back into the book
/// and is retried on the next poll. Fatal gateway errors end the watcher.
///
/// # Errors
///
/// Propagates fatal gateway errors.
pub async fn unwind_watcher<G>(
    gateway: &mut G,
    store: Arc<MarketStore>,
    run: RunFlag,
    positions: PositionBook,
    poll: Duration,
) -> Result<()>
where
    G: OrderGateway,
{
    while run.is_running() {
        tokio::time::sleep(poll).await;
        if !run.is_running() {
            break;
        }

        let spot = store.index_price().await;
        if spot <= 0.0 {
            continue;
        }

        let breached = positions.take_breached(spot).await;
        for position in breached {
            if let Err(e) = close_leg(gateway, &store, &position).await {
                if e.is_fatal() {
                    positions.add(position).await;
                    return Err(e);
                }
                warn!(
                    instrument = %position.instrument_name,
                    error = %e,
                    "unwind failed, will retry"
                );
                positions.add(position).await;
            }
        }
    }
    Ok(())
}

async fn close_leg<G>(gateway: &mut G, store: &MarketStore, position: &Position) -> Result<()>
where
    G: OrderGateway,
{
    let ask = store
        .quote(position.strike, position.kind)
        .await
        .map_or(f64::NAN, |quote| quote.ask);
    // No resting ask means no resting liquidity; a zero price tells the
    // venue to work the close at market.
    let price = if ask.is_finite() && ask > 0.0 { ask } else { 0.0 };

    gateway.close_position(&position.instrument_name, price).await?;
    info!(instrument = %position.instrument_name, price, "breached leg closed");
    Ok(())
}

/// End-of-test teardown: closes every tracked leg unconditionally so the
/// test account carries nothing into the next session. Live cycles never
/// call this; their legs are left open and reseeded on resume. Failures are
/// logged and skipped, the cycle is over either way.
pub async fn close_all_positions<G>(
    gateway: &mut G,
    store: &MarketStore,
    positions: &PositionBook,
) -> Result<()>
where
    G: OrderGateway,
{
    let remaining = positions.drain_all().await;
    if remaining.is_empty() {
        return Ok(());
    }

    for position in remaining {
        if let Err(e) = close_leg(gateway, store, &position).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(instrument = %position.instrument_name, error = %e, "teardown close failed");
        }
    }
    Ok(())
}

//! Gateway traits at the venue seam.
//!
//! The decision loop and the unwind watcher talk to the venue only through
//! these traits; `strangle-deribit` provides the live implementation and
//! tests substitute recording fakes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AccountSnapshot, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    #[must_use]
    pub fn as_method_suffix(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// Acknowledgement of a submitted or amended order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
    pub order_state: String,
    pub filled_amount: f64,
}

impl OrderAck {
    /// The venue reports limit sells against a resting bid as filled
    /// immediately; anything else is still working.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.order_state == "filled" || self.filled_amount > 0.0
    }
}

#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Places a limit sell on an option leg.
    async fn sell_limit(
        &mut self,
        instrument: &str,
        amount: f64,
        price: f64,
        label: &str,
    ) -> Result<OrderAck>;

    /// Opens a stop-market trigger order on the underlying perpetual.
    async fn place_stop(
        &mut self,
        instrument: &str,
        side: OrderSide,
        amount: f64,
        trigger_price: f64,
        label: &str,
    ) -> Result<OrderAck>;

    /// Amends an existing trigger order's size in place.
    async fn edit_order(
        &mut self,
        order_id: &str,
        amount: f64,
        trigger_price: f64,
    ) -> Result<OrderAck>;

    /// Closes an open position with a limit order at the given price.
    async fn close_position(&mut self, instrument: &str, price: f64) -> Result<()>;
}

#[async_trait]
pub trait AccountGateway: Send + Sync {
    async fn account_summary(&mut self) -> Result<AccountSnapshot>;

    /// Open option positions, used to reseed state after a mid-cycle restart.
    async fn open_positions(&mut self) -> Result<Vec<Position>>;
}

use std::collections::HashMap;

use strangle_core::Strike;

/// A resting stop-market hedge on the perpetual, keyed to one option strike.
#[derive(Debug, Clone, PartialEq)]
pub struct HedgeOrder {
    pub order_id: String,
    /// Contract size in USD.
    pub size: f64,
}

/// At most one hedge order per strike; selling more contracts at a strike
/// amends the existing stop instead of stacking a second one.
#[derive(Debug, Default)]
pub struct HedgeBook {
    orders: HashMap<Strike, HedgeOrder>,
}

impl HedgeBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, strike: Strike) -> Option<&HedgeOrder> {
        self.orders.get(&strike)
    }

    pub fn insert(&mut self, strike: Strike, order: HedgeOrder) {
        self.orders.insert(strike, order);
    }

    /// Grows the resting hedge at `strike` by `extra` USD, returning the new
    /// total so the caller can edit the venue order to match.
    pub fn grow(&mut self, strike: Strike, extra: f64) -> Option<f64> {
        let order = self.orders.get_mut(&strike)?;
        order.size += extra;
        Some(order.size)
    }

    pub fn remove(&mut self, strike: Strike) -> Option<HedgeOrder> {
        self.orders.remove(&strike)
    }

    pub fn reset(&mut self) {
        self.orders.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hedge_per_strike() {
        let mut book = HedgeBook::new();
        let strike = Strike(25000);
        book.insert(strike, HedgeOrder { order_id: "h-1".into(), size: 2500.0 });

        // A second sale at the strike amends, it never inserts.
        let total = book.grow(strike, 2500.0).unwrap();
        assert!((total - 5000.0).abs() < 1e-9);
        assert_eq!(book.len(), 1);
        assert_eq!(book.get(strike).unwrap().order_id, "h-1");
    }

    #[test]
    fn grow_on_unknown_strike_is_none() {
        let mut book = HedgeBook::new();
        assert!(book.grow(Strike(30000), 1000.0).is_none());
    }

    #[test]
    fn reset_clears_the_book() {
        let mut book = HedgeBook::new();
        book.insert(Strike(25000), HedgeOrder { order_id: "h-1".into(), size: 2500.0 });
        book.reset();
        assert!(book.is_empty());
    }
}

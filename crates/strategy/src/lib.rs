//! Leg-selection engine.
//!
//! Selectors are pure functions of the chain snapshot and spot price: no
//! network, no account state, no clock. Given the same inputs they must
//! return the same candidates, which is what makes them testable against
//! fixed chain fixtures. A selector is injected once at construction and
//! never swapped mid-run.

pub mod delta_band;

pub use delta_band::DeltaBandSelector;

use strangle_core::{ChainSnapshot, Instrument, Quote};

/// One side of a candidate strangle.
#[derive(Debug, Clone)]
pub struct Leg {
    pub instrument: Instrument,
    pub quote: Quote,
}

/// A tradeable pair of legs to sell.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub put: Leg,
    pub call: Leg,
    /// Sum of both leg bids, in underlying terms.
    pub combined_premium: f64,
    /// USD distance between the call and put strikes.
    pub strike_distance: f64,
}

impl Candidate {
    /// Pairs two legs. Returns `None` when either leg has no resting bid;
    /// a strangle cannot be sold into an empty book.
    #[must_use]
    pub fn pair(put: Leg, call: Leg) -> Option<Self> {
        if !put.quote.has_bid() || !call.quote.has_bid() {
            return None;
        }
        let combined_premium = put.quote.bid + call.quote.bid;
        let strike_distance =
            (call.instrument.strike.as_f64() - put.instrument.strike.as_f64()).abs();
        Some(Self { put, call, combined_premium, strike_distance })
    }
}

/// A pluggable selection policy.
pub trait LegSelector: Send + Sync {
    /// Produces zero or more candidates, best-first by the selector's own
    /// ordering.
    fn select(&self, chain: &ChainSnapshot, spot: f64) -> Vec<Candidate>;

    fn name(&self) -> &str;
}

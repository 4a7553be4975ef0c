//! Domain types shared by every crate in the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Option side of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Put,
    Call,
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Put => write!(f, "put"),
            Self::Call => write!(f, "call"),
        }
    }
}

/// Strike price in whole USD.
///
/// Chains are keyed by this integer newtype instead of the raw float the
/// venue reports, so lookups never depend on float equality.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Strike(pub i64);

impl Strike {
    /// Rounds a float strike from the venue to the integer grid.
    #[must_use]
    pub fn from_venue(raw: f64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self(raw.round() as i64)
    }

    /// Floors a spot price onto a strike grid (e.g. the 250-USD grid).
    #[must_use]
    pub fn floor_to_grid(price: f64, grid: f64) -> Self {
        let floored = price - price.rem_euclid(grid);
        #[allow(clippy::cast_possible_truncation)]
        Self(floored.round() as i64)
    }

    #[must_use]
    pub fn as_f64(self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        {
            self.0 as f64
        }
    }

    /// Absolute distance from this strike to a spot price, in USD.
    #[must_use]
    pub fn distance_to(self, spot: f64) -> f64 {
        (self.as_f64() - spot).abs()
    }
}

impl std::fmt::Display for Strike {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One tradeable option instrument, immutable for the length of a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Venue instrument name, e.g. `BTC-30AUG26-60000-C`.
    pub name: String,
    pub strike: Strike,
    pub kind: OptionKind,
    /// Venue expiry tag, e.g. `30AUG26`.
    pub expiry_tag: String,
}

/// Live top-of-book quote and greeks for one instrument.
///
/// `bid`/`ask` are `NaN` when the venue reports a non-positive price, i.e.
/// there is no resting liquidity on that side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub delta: f64,
    pub gamma: f64,
    pub vega: f64,
    pub rho: f64,
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    /// A quote with no liquidity on either side, used to seed the chain.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            bid: f64::NAN,
            ask: f64::NAN,
            bid_size: 0.0,
            ask_size: 0.0,
            delta: 0.0,
            gamma: 0.0,
            vega: 0.0,
            rho: 0.0,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn has_bid(&self) -> bool {
        self.bid.is_finite()
    }

    #[must_use]
    pub fn has_ask(&self) -> bool {
        self.ask.is_finite()
    }
}

/// Read-only copy of one side of the option chain, handed to the selector.
pub type ChainSide = std::collections::BTreeMap<Strike, (Instrument, Quote)>;

/// Copy-on-read view of the full chain for one expiry.
#[derive(Debug, Clone, Default)]
pub struct ChainSnapshot {
    pub puts: ChainSide,
    pub calls: ChainSide,
}

/// Account equity snapshot, refreshed by the account-fetch path only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: f64,
    pub available_funds: f64,
}

impl AccountSnapshot {
    /// `available_funds / equity`, the margin-gate safety ratio.
    #[must_use]
    pub fn funds_ratio(&self) -> f64 {
        if self.equity <= 0.0 {
            return 0.0;
        }
        self.available_funds / self.equity
    }
}

/// An open short option position tracked for unwind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub instrument_name: String,
    pub strike: Strike,
    pub kind: OptionKind,
    pub size: f64,
    /// Audit label carrying the premium signature and strike, when the
    /// order was placed with one.
    pub label: Option<String>,
}

impl Position {
    /// True when spot has crossed the strike against the short holder.
    #[must_use]
    pub fn is_breached(&self, spot: f64) -> bool {
        match self.kind {
            OptionKind::Put => self.strike.as_f64() >= spot,
            OptionKind::Call => self.strike.as_f64() <= spot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strike_floor_to_grid() {
        assert_eq!(Strike::floor_to_grid(26137.5, 250.0), Strike(26000));
        assert_eq!(Strike::floor_to_grid(26250.0, 250.0), Strike(26250));
    }

    #[test]
    fn empty_quote_has_no_liquidity() {
        let q = Quote::empty();
        assert!(!q.has_bid());
        assert!(!q.has_ask());
    }

    #[test]
    fn funds_ratio_guards_zero_equity() {
        let acc = AccountSnapshot { equity: 0.0, available_funds: 10.0 };
        assert_eq!(acc.funds_ratio(), 0.0);
    }

    #[test]
    fn short_put_breached_when_spot_at_or_below_strike() {
        let pos = Position {
            instrument_name: "BTC-30AUG26-25000-P".into(),
            strike: Strike(25000),
            kind: OptionKind::Put,
            size: 0.1,
            label: None,
        };
        assert!(pos.is_breached(24900.0));
        assert!(pos.is_breached(25000.0));
        assert!(!pos.is_breached(25100.0));
    }

    #[test]
    fn short_call_breached_when_spot_at_or_above_strike() {
        let pos = Position {
            instrument_name: "BTC-30AUG26-27000-C".into(),
            strike: Strike(27000),
            kind: OptionKind::Call,
            size: 0.1,
            label: None,
        };
        assert!(pos.is_breached(27100.0));
        assert!(!pos.is_breached(26900.0));
    }
}

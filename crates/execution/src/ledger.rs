//! Per-cycle dedup registry keyed by premium signature.

use std::collections::HashMap;

/// Canonical dedup key for a candidate: the combined premium scaled to an
/// integer (×10⁴). Two floats that format alike can never split into two
/// signatures, and two that differ below the scale collapse into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PremiumSignature(i64);

impl PremiumSignature {
    const SCALE: f64 = 10_000.0;

    #[must_use]
    pub fn from_premium(premium: f64) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        Self((premium * Self::SCALE).round() as i64)
    }

    /// The premium this signature stands for.
    #[must_use]
    pub fn premium(self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        {
            self.0 as f64 / Self::SCALE
        }
    }
}

impl std::fmt::Display for PremiumSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.premium())
    }
}

/// Counts executed trades per premium signature within one cycle.
///
/// Invariant: a signature at its cap is never traded again until the cycle
/// resets; `max_traded_prem` only rises within a cycle.
#[derive(Debug)]
pub struct TradeLedger {
    counts: HashMap<PremiumSignature, u32>,
    cap: u32,
    max_traded_prem: f64,
}

impl TradeLedger {
    #[must_use]
    pub fn new(cap: u32) -> Self {
        Self { counts: HashMap::new(), cap, max_traded_prem: 0.0 }
    }

    #[must_use]
    pub fn is_capped(&self, signature: PremiumSignature) -> bool {
        self.counts.get(&signature).copied().unwrap_or(0) >= self.cap
    }

    #[must_use]
    pub fn executed(&self, signature: PremiumSignature) -> u32 {
        self.counts.get(&signature).copied().unwrap_or(0)
    }

    /// High-water mark of premiums traded this cycle.
    #[must_use]
    pub fn max_traded_prem(&self) -> f64 {
        self.max_traded_prem
    }

    /// Records one successful submission of this signature.
    pub fn record(&mut self, signature: PremiumSignature) {
        *self.counts.entry(signature).or_insert(0) += 1;
        if signature.premium() > self.max_traded_prem {
            self.max_traded_prem = signature.premium();
        }
    }

    /// Clears counters and watermark at cycle reset.
    pub fn reset(&mut self) {
        self.counts.clear();
        self.max_traded_prem = 0.0;
    }
}

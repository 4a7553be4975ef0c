//! Pre-trade gating and sizing.
//!
//! Skip conditions are not errors: a skipped tick is the common case, logged
//! at debug and retried on the next interval.

use strangle_core::{AccountSnapshot, OptionKind, TradingConfig};
use strangle_strategy::Candidate;

use crate::ledger::{PremiumSignature, TradeLedger};

/// Why a tick declined to trade. Expected control flow, never escalated.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    DuplicateSignature { signature: String },
    PremiumTooSmall { premium: f64, min: f64 },
    StrikeTooClose { distance: f64, min: f64 },
    FundsRatio { ratio: f64, min: f64 },
    MarginInsufficient { required: f64, available: f64 },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateSignature { signature } => {
                write!(f, "signature {signature} already at its cap")
            }
            Self::PremiumTooSmall { premium, min } => {
                write!(f, "premium {premium:.4} below minimum {min:.4}")
            }
            Self::StrikeTooClose { distance, min } => {
                write!(f, "strike distance {distance:.0} below minimum {min:.0}")
            }
            Self::FundsRatio { ratio, min } => {
                write!(f, "funds ratio {ratio:.3} below safety ratio {min:.3}")
            }
            Self::MarginInsufficient { required, available } => {
                write!(f, "projected margin {required:.4} exceeds available {available:.4}")
            }
        }
    }
}

/// Venue margin formula, pluggable because the exact constants are venue
/// policy, not strategy.
pub trait MarginModel: Send + Sync {
    /// Initial margin reserved for selling `size` contracts of one leg, in
    /// underlying currency.
    fn initial_margin(
        &self,
        kind: OptionKind,
        strike: f64,
        mark: f64,
        spot: f64,
        size: f64,
    ) -> f64;
}

/// Documented short-option initial margin:
/// `max(0.15 − OTM amount / spot, 0.1) + mark price`, per contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortOptionMargin;

impl MarginModel for ShortOptionMargin {
    fn initial_margin(
        &self,
        kind: OptionKind,
        strike: f64,
        mark: f64,
        spot: f64,
        size: f64,
    ) -> f64 {
        let otm = match kind {
            OptionKind::Put => (spot - strike).max(0.0),
            OptionKind::Call => (strike - spot).max(0.0),
        };
        let base = (0.15 - otm / spot).max(0.1);
        (base + mark) * size
    }
}

/// All pre-trade gates plus sizing, parameterised by the trading config.
pub struct RiskGates {
    min_premium: f64,
    min_strike_distance: f64,
    low_vol_threshold: f64,
    safety_funds_ratio: f64,
    margin_buffer: f64,
    risk_pct: f64,
    worst_case_loss: f64,
    min_lot: f64,
    lot_step: f64,
}

impl RiskGates {
    #[must_use]
    pub fn new(config: &TradingConfig) -> Self {
        Self {
            min_premium: config.min_premium,
            min_strike_distance: config.min_strike_distance,
            low_vol_threshold: config.low_vol_threshold,
            safety_funds_ratio: config.safety_funds_ratio,
            margin_buffer: config.margin_buffer,
            risk_pct: config.risk_pct,
            worst_case_loss: config.worst_case_loss,
            min_lot: config.min_lot,
            lot_step: config.lot_step,
        }
    }

    /// Dedup and quality gate. When DVOL sits below the low-volatility
    /// threshold the premium/distance minimums are waived (small premiums
    /// are all the market offers), but the signature cap always holds.
    ///
    /// # Errors
    ///
    /// Returns the skip reason; the caller logs it and waits for the next
    /// tick.
    pub fn check_candidate(
        &self,
        candidate: &Candidate,
        ledger: &TradeLedger,
        dvol: f64,
    ) -> Result<PremiumSignature, SkipReason> {
        let signature = PremiumSignature::from_premium(candidate.combined_premium);

        if ledger.is_capped(signature) {
            return Err(SkipReason::DuplicateSignature { signature: signature.to_string() });
        }

        let low_vol = dvol > 0.0 && dvol < self.low_vol_threshold;
        if !low_vol {
            if candidate.combined_premium < self.min_premium {
                return Err(SkipReason::PremiumTooSmall {
                    premium: candidate.combined_premium,
                    min: self.min_premium,
                });
            }
            if candidate.strike_distance < self.min_strike_distance {
                return Err(SkipReason::StrikeTooClose {
                    distance: candidate.strike_distance,
                    min: self.min_strike_distance,
                });
            }
        }

        Ok(signature)
    }

    /// Margin gate for an already-sized candidate.
    ///
    /// # Errors
    ///
    /// Returns the skip reason when funds are too thin.
    pub fn check_margin(
        &self,
        candidate: &Candidate,
        account: &AccountSnapshot,
        size: f64,
        spot: f64,
        model: &dyn MarginModel,
    ) -> Result<(), SkipReason> {
        let ratio = account.funds_ratio();
        if ratio < self.safety_funds_ratio {
            return Err(SkipReason::FundsRatio { ratio, min: self.safety_funds_ratio });
        }

        let put_margin = model.initial_margin(
            OptionKind::Put,
            candidate.put.instrument.strike.as_f64(),
            candidate.put.quote.bid,
            spot,
            size,
        );
        let call_margin = model.initial_margin(
            OptionKind::Call,
            candidate.call.instrument.strike.as_f64(),
            candidate.call.quote.bid,
            spot,
            size,
        );
        let required = put_margin + call_margin + self.margin_buffer;
        if required > account.available_funds {
            return Err(SkipReason::MarginInsufficient {
                required,
                available: account.available_funds,
            });
        }

        Ok(())
    }

    /// Order size: risk percentage of equity over the assumed worst-case
    /// loss per contract, floored to the lot grid with a minimum lot.
    #[must_use]
    pub fn order_size(&self, equity: f64) -> f64 {
        let raw = (self.risk_pct * equity) / self.worst_case_loss;
        let floored = (raw / self.lot_step).floor() * self.lot_step;
        floored.max(self.min_lot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strangle_core::{Instrument, Quote, Strike};
    use strangle_strategy::{Candidate, Leg};

    fn candidate(put_bid: f64, call_bid: f64, put_strike: i64, call_strike: i64) -> Candidate {
        let leg = |strike: i64, kind: OptionKind, bid: f64| Leg {
            instrument: Instrument {
                name: format!("BTC-30AUG26-{strike}-X"),
                strike: Strike(strike),
                kind,
                expiry_tag: "30AUG26".into(),
            },
            quote: Quote { bid, ask: bid + 0.0005, ..Quote::empty() },
        };
        Candidate::pair(
            leg(put_strike, OptionKind::Put, put_bid),
            leg(call_strike, OptionKind::Call, call_bid),
        )
        .expect("both legs carry bids")
    }

    fn gates() -> RiskGates {
        RiskGates::new(&TradingConfig::default())
    }

    #[test]
    fn accepts_pair_clearing_both_minimums() {
        // premium 0.009 >= 0.008, distance 2000 >= 1500
        let c = candidate(0.004, 0.005, 25000, 27000);
        let ledger = TradeLedger::new(2);
        assert!(gates().check_candidate(&c, &ledger, 50.0).is_ok());
    }

    #[test]
    fn capped_signature_is_skipped() {
        let c = candidate(0.004, 0.005, 25000, 27000);
        let mut ledger = TradeLedger::new(2);
        let sig = PremiumSignature::from_premium(c.combined_premium);
        ledger.record(sig);
        ledger.record(sig);

        let skip = gates().check_candidate(&c, &ledger, 50.0).unwrap_err();
        assert!(matches!(skip, SkipReason::DuplicateSignature { .. }));
    }

    #[test]
    fn small_premium_is_skipped_unless_low_vol() {
        let c = candidate(0.002, 0.003, 25000, 27000);
        let ledger = TradeLedger::new(2);
        let g = gates();

        assert!(matches!(
            g.check_candidate(&c, &ledger, 60.0),
            Err(SkipReason::PremiumTooSmall { .. })
        ));
        // DVOL 20 < 35: override engaged, minimums waived.
        assert!(g.check_candidate(&c, &ledger, 20.0).is_ok());
    }

    #[test]
    fn close_strikes_are_skipped() {
        let c = candidate(0.005, 0.005, 25800, 26200);
        let ledger = TradeLedger::new(2);
        assert!(matches!(
            gates().check_candidate(&c, &ledger, 60.0),
            Err(SkipReason::StrikeTooClose { .. })
        ));
    }

    #[test]
    fn funds_ratio_below_safety_is_margin_insufficient() {
        // ratio 100/1000 = 0.1 < 0.3
        let c = candidate(0.004, 0.005, 25000, 27000);
        let account = AccountSnapshot { equity: 1000.0, available_funds: 100.0 };
        let skip = gates()
            .check_margin(&c, &account, 0.1, 26000.0, &ShortOptionMargin)
            .unwrap_err();
        assert!(matches!(skip, SkipReason::FundsRatio { .. }));
    }

    #[test]
    fn projected_margin_exceeding_funds_is_skipped() {
        let c = candidate(0.004, 0.005, 25000, 27000);
        // Healthy ratio but almost no absolute funds.
        let account = AccountSnapshot { equity: 0.1, available_funds: 0.05 };
        let skip = gates()
            .check_margin(&c, &account, 1.0, 26000.0, &ShortOptionMargin)
            .unwrap_err();
        assert!(matches!(skip, SkipReason::MarginInsufficient { .. }));
    }

    #[test]
    fn margin_model_floors_deep_otm() {
        let m = ShortOptionMargin;
        // Deep OTM put: 0.15 - 5000/26000 < 0.1, so the 0.1 floor applies.
        let deep = m.initial_margin(OptionKind::Put, 21000.0, 0.004, 26000.0, 1.0);
        assert!((deep - 0.104).abs() < 1e-9);
        // ATM leg pays the full 0.15.
        let atm = m.initial_margin(OptionKind::Call, 26000.0, 0.02, 26000.0, 1.0);
        assert!((atm - 0.17).abs() < 1e-9);
    }

    #[test]
    fn order_size_floors_to_lot_grid() {
        let g = gates();
        // 0.01 * 2.0 / 0.15 = 0.1333, floored to 0.1
        assert!((g.order_size(2.0) - 0.1).abs() < 1e-9);
        // Tiny equity still trades the minimum lot.
        assert!((g.order_size(0.01) - 0.1).abs() < 1e-9);
        // 0.01 * 62.0 / 0.15 = 4.133, floored to 4.1
        assert!((g.order_size(62.0) - 4.1).abs() < 1e-9);
    }
}

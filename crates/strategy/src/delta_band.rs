use strangle_core::{ChainSide, ChainSnapshot, Strike, TradingConfig};

use crate::{Candidate, Leg, LegSelector};

/// Widening steps the fallback search will try before giving up.
const MAX_FALLBACK_STEPS: i64 = 40;

/// Default selection policy: sell the put and call with the largest |delta|
/// inside the configured bands; when delta filtering leaves a side empty,
/// fall back to a fixed strike-distance rule widening outward from spot on
/// the strike grid.
#[derive(Debug, Clone)]
pub struct DeltaBandSelector {
    put_delta_min: f64,
    put_delta_max: f64,
    call_delta_min: f64,
    call_delta_max: f64,
    strike_step: f64,
    fallback_offset: f64,
}

impl DeltaBandSelector {
    #[must_use]
    pub fn new(config: &TradingConfig) -> Self {
        Self {
            put_delta_min: config.put_delta_min,
            put_delta_max: config.put_delta_max,
            call_delta_min: config.call_delta_min,
            call_delta_max: config.call_delta_max,
            strike_step: config.strike_step,
            fallback_offset: config.fallback_offset,
        }
    }

    /// Largest-|delta| put inside the band, requiring a resting bid.
    fn pick_put(&self, puts: &ChainSide) -> Option<Leg> {
        puts.values()
            .filter(|(_, q)| q.has_bid())
            .filter(|(_, q)| q.delta >= self.put_delta_min && q.delta <= self.put_delta_max)
            .min_by(|(_, a), (_, b)| a.delta.total_cmp(&b.delta))
            .map(|(inst, q)| Leg { instrument: inst.clone(), quote: *q })
    }

    /// Largest-|delta| call inside the band, requiring a resting bid.
    fn pick_call(&self, calls: &ChainSide) -> Option<Leg> {
        calls
            .values()
            .filter(|(_, q)| q.has_bid())
            .filter(|(_, q)| q.delta > self.call_delta_min && q.delta <= self.call_delta_max)
            .max_by(|(_, a), (_, b)| a.delta.total_cmp(&b.delta))
            .map(|(inst, q)| Leg { instrument: inst.clone(), quote: *q })
    }

    /// Fixed strike-distance fallback: start `fallback_offset` USD out from
    /// spot (rounded to the grid) and widen outward one grid step at a time
    /// until an in-chain strike with a resting bid appears.
    fn fallback_leg(&self, side: &ChainSide, spot: f64, below: bool) -> Option<Leg> {
        let base = Strike::floor_to_grid(spot, self.strike_step).as_f64();
        #[allow(clippy::cast_possible_truncation)]
        let step = self.strike_step.round() as i64;

        for i in 0..MAX_FALLBACK_STEPS {
            let offset = self.fallback_offset + (i * step) as f64;
            let target = if below { base - offset } else { base + offset };
            #[allow(clippy::cast_possible_truncation)]
            let strike = Strike(target.round() as i64);
            if let Some((inst, q)) = side.get(&strike) {
                if q.has_bid() {
                    return Some(Leg { instrument: inst.clone(), quote: *q });
                }
            }
        }
        None
    }
}

impl LegSelector for DeltaBandSelector {
    fn select(&self, chain: &ChainSnapshot, spot: f64) -> Vec<Candidate> {
        let put = self.pick_put(&chain.puts).or_else(|| {
            tracing::debug!(spot, "no put in the delta band, trying strike-distance fallback");
            self.fallback_leg(&chain.puts, spot, true)
        });
        let call = self.pick_call(&chain.calls).or_else(|| {
            tracing::debug!(spot, "no call in the delta band, trying strike-distance fallback");
            self.fallback_leg(&chain.calls, spot, false)
        });

        let (Some(put), Some(call)) = (put, call) else {
            return Vec::new();
        };

        Candidate::pair(put, call).into_iter().collect()
    }

    fn name(&self) -> &str {
        "delta-band"
    }
}

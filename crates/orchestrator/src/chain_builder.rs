//! Cycle preparation: which expiry to trade and which strikes to watch.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use strangle_core::{Instrument, OptionKind, Strike, TradingConfig};

/// Venue expiry tag for the cycle starting at `now`.
///
/// Dailies settle at the cutoff hour UTC. Through the end of that hour the
/// next-day expiry still has a full session left; from the following hour
/// on, that expiry is already the front one about to settle, so the cycle
/// trades the day after.
#[must_use]
pub fn expiry_tag(now: DateTime<Utc>, cutoff_hour: u32) -> String {
    let offset = if now.hour() <= cutoff_hour { 1 } else { 2 };
    let expiry = now.date_naive() + Duration::days(offset);
    format!(
        "{}{}{:02}",
        expiry.day(),
        expiry.format("%b").to_string().to_uppercase(),
        expiry.year() % 100
    )
}

/// Trims the full option listing down to the cycle's watch set.
///
/// Only the cycle expiry survives, and each side keeps an asymmetric band
/// around the grid-floored spot: calls reach further above, puts further
/// below, because that is where each side's sellable strikes live.
#[must_use]
pub fn filter_chain(
    instruments: Vec<Instrument>,
    expiry_tag: &str,
    spot: f64,
    config: &TradingConfig,
) -> Vec<Instrument> {
    let base = Strike::floor_to_grid(spot, config.strike_step).as_f64();
    instruments
        .into_iter()
        .filter(|i| i.expiry_tag == expiry_tag)
        .filter(|i| {
            let strike = i.strike.as_f64();
            match i.kind {
                OptionKind::Call => {
                    strike >= base - config.band_near && strike <= base + config.band_far
                }
                OptionKind::Put => {
                    strike >= base - config.band_far && strike <= base + config.band_near
                }
            }
        })
        .collect()
}

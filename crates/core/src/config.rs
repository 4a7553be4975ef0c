use serde::{Deserialize, Serialize};

/// Venue environment selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Test,
    Prod,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Prod => write!(f, "prod"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub venue: VenueConfig,
    pub trading: TradingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub env: Environment,
    /// Underlying currency, e.g. `BTC` or `ETH`.
    pub currency: String,
    pub test: VenueEndpoint,
    pub prod: VenueEndpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueEndpoint {
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
}

impl VenueConfig {
    /// The endpoint for the configured environment.
    #[must_use]
    pub fn endpoint(&self) -> &VenueEndpoint {
        match self.env {
            Environment::Test => &self.test,
            Environment::Prod => &self.prod,
        }
    }

    /// Price-index channel name, e.g. `deribit_price_index.btc_usd`.
    #[must_use]
    pub fn price_index_channel(&self) -> String {
        format!("deribit_price_index.{}_usd", self.currency.to_lowercase())
    }

    /// Volatility-index channel name, e.g. `deribit_volatility_index.btc_usd`.
    #[must_use]
    pub fn volatility_channel(&self) -> String {
        format!("deribit_volatility_index.{}_usd", self.currency.to_lowercase())
    }

    /// Name of the perpetual future used for hedging, e.g. `BTC-PERPETUAL`.
    #[must_use]
    pub fn perpetual_name(&self) -> String {
        format!("{}-PERPETUAL", self.currency.to_uppercase())
    }
}

/// Every numeric threshold in the strategy and risk path lives here; the
/// defaults are the values the bot last traded with, not constants baked
/// into the code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Submit real orders. When false the bot streams, decides and logs, and
    /// force-closes anything open at wind-down.
    pub live: bool,
    /// Run exactly one cycle then exit (connectivity verification mode).
    pub single_cycle: bool,

    // Selection thresholds.
    pub put_delta_min: f64,
    pub put_delta_max: f64,
    pub call_delta_min: f64,
    pub call_delta_max: f64,
    /// Strike grid of the venue's listing, USD.
    pub strike_step: f64,
    /// Offset from spot for the fallback strike-distance rule, USD.
    pub fallback_offset: f64,

    // Chain construction.
    /// Narrow side of the asymmetric strike band around spot, USD.
    pub band_near: f64,
    /// Wide side of the asymmetric strike band around spot, USD.
    pub band_far: f64,
    /// Through this UTC hour the next-day expiry is traded, after it the
    /// day after next.
    pub expiry_cutoff_hour: u32,

    // Decision gates.
    pub min_premium: f64,
    pub min_strike_distance: f64,
    pub max_trades_per_premium: u32,
    /// DVOL level below which the premium/distance minimums are waived.
    pub low_vol_threshold: f64,

    // Margin and sizing.
    pub safety_funds_ratio: f64,
    /// Funds kept free on top of projected initial margin, in currency.
    pub margin_buffer: f64,
    /// Fraction of equity risked per trade.
    pub risk_pct: f64,
    /// Assumed worst-case loss per contract unit, in currency.
    pub worst_case_loss: f64,
    pub min_lot: f64,
    pub lot_step: f64,

    // Loop cadence and failure bounds.
    pub decision_interval_secs: u64,
    pub stale_ticks_limit: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_secs: u64,
    /// Delay between consecutive ticker-stream launches, milliseconds.
    pub stagger_millis: u64,

    // Cycle lifecycle.
    pub cycle_secs: u64,
    pub grace_delay_secs: u64,
    /// Spot drift from the cycle-initial price that forces an early reset, USD.
    pub price_guard: f64,
    /// Pause between consecutive order submissions, milliseconds.
    pub order_pace_millis: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            live: false,
            single_cycle: false,
            put_delta_min: -0.2,
            put_delta_max: -0.1,
            call_delta_min: 0.09,
            call_delta_max: 0.2,
            strike_step: 250.0,
            fallback_offset: 2000.0,
            band_near: 2000.0,
            band_far: 5000.0,
            expiry_cutoff_hour: 8,
            min_premium: 0.008,
            min_strike_distance: 1500.0,
            max_trades_per_premium: 2,
            low_vol_threshold: 35.0,
            safety_funds_ratio: 0.3,
            margin_buffer: 0.05,
            risk_pct: 0.01,
            worst_case_loss: 0.15,
            min_lot: 0.1,
            lot_step: 0.1,
            decision_interval_secs: 2,
            stale_ticks_limit: 30,
            max_reconnect_attempts: 5,
            reconnect_delay_secs: 2,
            stagger_millis: 300,
            cycle_secs: 86_400,
            grace_delay_secs: 5,
            price_guard: 2000.0,
            order_pace_millis: 500,
        }
    }
}

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

use crate::config::AppConfig;
use crate::error::Result;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration from `config/Config.toml` with
    /// `STRANGLE_`-prefixed environment overrides (credentials are expected
    /// to come from the environment in prod).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a field fails to parse.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config/Config.toml")
    }

    /// Loads configuration from an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a field fails to parse.
    pub fn load_from(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("STRANGLE_").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    #[test]
    fn loads_minimal_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "Config.toml",
                r#"
                [venue]
                env = "test"
                currency = "BTC"

                [venue.test]
                url = "wss://test.deribit.com/ws/api/v2"
                client_id = "abc"
                client_secret = "def"

                [venue.prod]
                url = "wss://www.deribit.com/ws/api/v2"
                client_id = ""
                client_secret = ""

                [trading]
                live = false
                single_cycle = true
                put_delta_min = -0.2
                put_delta_max = -0.1
                call_delta_min = 0.09
                call_delta_max = 0.2
                strike_step = 250.0
                fallback_offset = 2000.0
                band_near = 2000.0
                band_far = 5000.0
                expiry_cutoff_hour = 8
                min_premium = 0.008
                min_strike_distance = 1500.0
                max_trades_per_premium = 2
                low_vol_threshold = 35.0
                safety_funds_ratio = 0.3
                margin_buffer = 0.05
                risk_pct = 0.01
                worst_case_loss = 0.15
                min_lot = 0.1
                lot_step = 0.1
                decision_interval_secs = 2
                stale_ticks_limit = 30
                max_reconnect_attempts = 5
                reconnect_delay_secs = 2
                stagger_millis = 300
                cycle_secs = 86400
                grace_delay_secs = 5
                price_guard = 2000.0
                order_pace_millis = 500
                "#,
            )?;

            let config = ConfigLoader::load_from("Config.toml").expect("config should parse");
            assert_eq!(config.venue.env, Environment::Test);
            assert!(config.trading.single_cycle);
            assert!((config.trading.min_premium - 0.008).abs() < f64::EPSILON);
            Ok(())
        });
    }
}

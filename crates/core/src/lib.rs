pub mod config;
pub mod config_loader;
pub mod error;
pub mod market;
pub mod state;
pub mod traits;
pub mod types;

pub use config::{AppConfig, Environment, TradingConfig, VenueConfig, VenueEndpoint};
pub use config_loader::ConfigLoader;
pub use error::{BotError, Result};
pub use market::MarketStore;
pub use state::RunFlag;
pub use traits::{AccountGateway, OrderAck, OrderGateway, OrderSide};
pub use types::{
    AccountSnapshot, ChainSide, ChainSnapshot, Instrument, OptionKind, Position, Quote, Strike,
};

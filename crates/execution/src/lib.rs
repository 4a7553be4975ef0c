pub mod gates;
pub mod hedge;
pub mod ledger;
pub mod manager;
pub mod positions;
pub mod unwind;

pub use gates::{MarginModel, RiskGates, ShortOptionMargin, SkipReason};
pub use hedge::{HedgeBook, HedgeOrder};
pub use ledger::{PremiumSignature, TradeLedger};
pub use manager::{TickOutcome, TradeEngine};
pub use positions::PositionBook;
pub use unwind::{close_all_positions, unwind_watcher};

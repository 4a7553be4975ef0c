pub mod codec;
pub mod client;
pub mod session;
pub mod streams;

pub use client::{DeribitClient, StopOrder};
pub use codec::{Incoming, RpcRequest};
pub use session::{Session, SessionState};

use thiserror::Error;

/// RPC error codes the venue uses for auth/session failures. Any of these
/// means the credentials or session are unusable and the process must stop.
const FATAL_RPC_CODES: &[i64] = &[13004, 13009, 13010];

/// Error taxonomy for the bot.
///
/// Recoverable transport problems trigger a reconnect, auth and session
/// problems stop the process, stale data restarts the cycle. Expected skip
/// conditions (margin, dedup) are intentionally *not* errors, see
/// `strangle-execution`.
#[derive(Error, Debug)]
pub enum BotError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("authentication rejected by venue: {message} (code {code})")]
    Auth { code: i64, message: String },

    #[error("venue RPC error: {message} (code {code})")]
    Rpc { code: i64, message: String },

    #[error("malformed venue payload: {0}")]
    Payload(String),

    #[error("no fresh market data for {ticks} consecutive ticks")]
    StaleData { ticks: u32 },

    #[error("gave up reconnecting after {attempts} consecutive failures")]
    ConnectionExhausted { attempts: u32 },

    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl BotError {
    /// Builds the right variant for an RPC `error` response: auth/session
    /// codes map to `Auth`, everything else to `Rpc`.
    #[must_use]
    pub fn from_rpc(code: i64, message: String) -> Self {
        if FATAL_RPC_CODES.contains(&code) {
            Self::Auth { code, message }
        } else {
            Self::Rpc { code, message }
        }
    }

    /// True when the error must wind the whole process down rather than the
    /// current stream or cycle.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Auth { .. } | Self::ConnectionExhausted { .. } | Self::Config(_)
        )
    }

    /// True when the error ends the current cycle but the process restarts.
    #[must_use]
    pub fn ends_cycle(&self) -> bool {
        self.is_fatal() || matches!(self, Self::StaleData { .. })
    }
}

pub type Result<T, E = BotError> = std::result::Result<T, E>;

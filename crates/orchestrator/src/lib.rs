//! Cycle supervision.
//!
//! One supervisor iteration is one expiry cycle: build the chain for the
//! front daily expiry, launch the stream and decision tasks, run until the
//! cycle timer, the price guard, or a fatal error ends it, then tear down
//! and start over.

pub mod chain_builder;

pub use chain_builder::{expiry_tag, filter_chain};

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{info, warn};

use strangle_core::{
    AccountGateway, AppConfig, BotError, Instrument, MarketStore, Position, Result, RunFlag,
    Strike, TradingConfig, VenueEndpoint,
};
use strangle_deribit::{
    streams::{price_index_stream, ticker_stream, volatility_stream, StreamLimits},
    DeribitClient,
};
use strangle_execution::{
    close_all_positions, unwind_watcher, HedgeOrder, PositionBook, ShortOptionMargin, TradeEngine,
};
use strangle_strategy::DeltaBandSelector;

/// Where a cycle currently is, for the log line only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Preparing,
    Active,
    WindingDown,
    Reset,
    Terminated,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Preparing => "preparing",
            Self::Active => "active",
            Self::WindingDown => "winding-down",
            Self::Reset => "reset",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Polls the run flag so cancellation can participate in `select!`.
async fn stopped(run: RunFlag) {
    while run.is_running() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

/// Everything `prepare` learns about the cycle before tasks launch.
struct CyclePrep {
    watch: Vec<Instrument>,
    spot: f64,
    tag: String,
    carried: Vec<Position>,
    stops: Vec<(Strike, HedgeOrder)>,
}

/// Bounds consecutive failed cycles so a dead venue cannot spin the
/// supervisor in a hot restart loop. Mirrors the session's linear backoff.
struct RestartBackoff {
    failures: u32,
    limit: u32,
    base: Duration,
}

impl RestartBackoff {
    fn new(trading: &TradingConfig) -> Self {
        Self {
            failures: 0,
            limit: trading.max_reconnect_attempts,
            base: Duration::from_secs(trading.reconnect_delay_secs),
        }
    }

    /// Delay before the next restart, linear in the failure count.
    ///
    /// # Errors
    ///
    /// [`BotError::ConnectionExhausted`] once the budget is spent.
    fn note_failure(&mut self) -> Result<Duration> {
        self.failures += 1;
        if self.failures > self.limit {
            return Err(BotError::ConnectionExhausted { attempts: self.failures - 1 });
        }
        Ok(self.base * self.failures)
    }

    fn reset(&mut self) {
        self.failures = 0;
    }
}

pub struct Supervisor {
    config: AppConfig,
    stop: RunFlag,
}

impl Supervisor {
    #[must_use]
    pub fn new(config: AppConfig, stop: RunFlag) -> Self {
        Self { config, stop }
    }

    /// Runs expiry cycles until a stop request or a fatal error.
    ///
    /// # Errors
    ///
    /// Fatal errors (auth rejection, reconnect exhaustion) end the loop and
    /// surface to the caller; anything else just ends the cycle.
    pub async fn run(&self) -> Result<()> {
        let mut backoff = RestartBackoff::new(&self.config.trading);
        while self.stop.is_running() {
            match self.run_cycle().await {
                Ok(()) => backoff.reset(),
                Err(e) if e.is_fatal() => {
                    info!(phase = %CyclePhase::Terminated, error = %e, "supervisor stopping");
                    return Err(e);
                }
                Err(e) => match backoff.note_failure() {
                    Ok(delay) => {
                        warn!(
                            error = %e,
                            delay_secs = delay.as_secs(),
                            "cycle ended with an error, restarting after backoff"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Err(exhausted) => {
                        info!(phase = %CyclePhase::Terminated, error = %e, "too many failed cycles in a row");
                        return Err(exhausted);
                    }
                },
            }
            if self.config.trading.single_cycle {
                break;
            }
        }
        info!(phase = %CyclePhase::Terminated, "supervisor stopped");
        Ok(())
    }

    async fn run_cycle(&self) -> Result<()> {
        let trading = self.config.trading.clone();
        let endpoint = self.config.venue.endpoint().clone();
        let currency = self.config.venue.currency.clone();
        let limits = StreamLimits {
            max_reconnect_attempts: trading.max_reconnect_attempts,
            reconnect_delay: Duration::from_secs(trading.reconnect_delay_secs),
        };

        let run = RunFlag::new();
        let store = Arc::new(MarketStore::new());
        let positions = PositionBook::new();

        info!(phase = %CyclePhase::Preparing, env = %self.config.venue.env, "cycle starting");
        let prep = self
            .prepare(&endpoint, &currency, &run, &store, &positions, &trading, limits)
            .await?;
        if prep.watch.is_empty() {
            warn!(expiry = %prep.tag, "no instruments in band, retrying after grace delay");
            tokio::time::sleep(Duration::from_secs(trading.grace_delay_secs)).await;
            return Ok(());
        }

        info!(
            phase = %CyclePhase::Active,
            expiry = %prep.tag,
            instruments = prep.watch.len(),
            spot = prep.spot,
            live = trading.live,
            "cycle active"
        );

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let spot = prep.spot;
        self.spawn_streams(&mut tasks, &endpoint, &run, &store, prep.watch, limits);
        self.spawn_engine(
            &mut tasks,
            &endpoint,
            &currency,
            &run,
            &store,
            &positions,
            &trading,
            limits,
            &prep.carried,
            prep.stops,
        )
        .await?;
        spawn_timers(&mut tasks, &run, &self.stop, &store, &trading, spot);

        let outcome = supervise(&mut tasks, &run).await;

        info!(phase = %CyclePhase::WindingDown, "cycle ending");
        run.shutdown();
        tokio::time::sleep(Duration::from_secs(trading.grace_delay_secs)).await;
        self.teardown(&endpoint, &currency, &store, &positions, &trading, limits).await;

        info!(phase = %CyclePhase::Reset, "clearing cycle state");
        tasks.abort_all();
        while tasks.join_next().await.is_some() {}
        store.seed_chain(Vec::new()).await;

        outcome
    }

    /// Lists the chain, trims it to the cycle band, and reseeds open
    /// positions, their dedup signatures, and resting hedge stops so a
    /// mid-cycle restart resumes instead of re-trading.
    #[allow(clippy::too_many_arguments)]
    async fn prepare(
        &self,
        endpoint: &VenueEndpoint,
        currency: &str,
        run: &RunFlag,
        store: &Arc<MarketStore>,
        positions: &PositionBook,
        trading: &TradingConfig,
        limits: StreamLimits,
    ) -> Result<CyclePrep> {
        let mut control = DeribitClient::connect(
            endpoint,
            run.clone(),
            currency.to_string(),
            limits.max_reconnect_attempts,
            limits.reconnect_delay,
        )
        .await?;

        let spot = control.get_index_price().await?;
        store.set_index_price(spot).await;

        let tag = expiry_tag(Utc::now(), trading.expiry_cutoff_hour);
        let listing = control.get_instruments().await?;
        let watch = filter_chain(listing, &tag, spot, trading);
        store.seed_chain(watch.clone()).await;

        let account = control.account_summary().await?;
        store.set_account(account).await;

        let open = control.open_positions().await?;
        let carried: Vec<_> = open
            .into_iter()
            .filter(|p| p.instrument_name.contains(&tag))
            .collect();
        if !carried.is_empty() {
            info!(count = carried.len(), "reseeded open legs from the venue");
        }
        positions.seed(carried.clone()).await;

        // Paper mode never places hedges, so only live cycles look for them.
        let stops = if trading.live {
            control
                .open_stop_orders(&self.config.venue.perpetual_name())
                .await?
                .into_iter()
                .map(|s| {
                    (
                        Strike::from_venue(s.trigger_price),
                        HedgeOrder { order_id: s.order_id, size: s.amount },
                    )
                })
                .collect()
        } else {
            Vec::new()
        };
        if !stops.is_empty() {
            info!(count = stops.len(), "reseeded resting hedge stops from the venue");
        }

        control.close().await;
        Ok(CyclePrep { watch, spot, tag, carried, stops })
    }

    fn spawn_streams(
        &self,
        tasks: &mut JoinSet<Result<()>>,
        endpoint: &VenueEndpoint,
        run: &RunFlag,
        store: &Arc<MarketStore>,
        watch: Vec<strangle_core::Instrument>,
        limits: StreamLimits,
    ) {
        tasks.spawn(price_index_stream(
            endpoint.clone(),
            run.clone(),
            Arc::clone(store),
            self.config.venue.price_index_channel(),
            limits,
        ));
        tasks.spawn(volatility_stream(
            endpoint.clone(),
            run.clone(),
            Arc::clone(store),
            self.config.venue.volatility_channel(),
            limits,
        ));

        let stagger = Duration::from_millis(self.config.trading.stagger_millis);
        for (i, instrument) in watch.into_iter().enumerate() {
            let endpoint = endpoint.clone();
            let run = run.clone();
            let store = Arc::clone(store);
            let delay = stagger * u32::try_from(i).unwrap_or(u32::MAX);
            tasks.spawn(async move {
                tokio::time::sleep(delay).await;
                if !run.is_running() {
                    return Ok(());
                }
                ticker_stream(endpoint, run, store, instrument, limits).await
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn spawn_engine(
        &self,
        tasks: &mut JoinSet<Result<()>>,
        endpoint: &VenueEndpoint,
        currency: &str,
        run: &RunFlag,
        store: &Arc<MarketStore>,
        positions: &PositionBook,
        trading: &TradingConfig,
        limits: StreamLimits,
        carried: &[Position],
        stops: Vec<(Strike, HedgeOrder)>,
    ) -> Result<()> {
        let trade_client = DeribitClient::connect(
            endpoint,
            run.clone(),
            currency.to_string(),
            limits.max_reconnect_attempts,
            limits.reconnect_delay,
        )
        .await?;
        let mut engine = TradeEngine::new(
            trade_client,
            Arc::clone(store),
            run.clone(),
            Box::new(DeltaBandSelector::new(trading)),
            Box::new(ShortOptionMargin),
            trading,
            positions.clone(),
            self.config.venue.perpetual_name(),
        );
        engine.seed_ledger(carried);
        engine.seed_hedges(stops);
        tasks.spawn(async move { engine.run().await });

        let mut unwind_client = DeribitClient::connect(
            endpoint,
            run.clone(),
            currency.to_string(),
            limits.max_reconnect_attempts,
            limits.reconnect_delay,
        )
        .await?;
        let store = Arc::clone(store);
        let run = run.clone();
        let positions = positions.clone();
        let poll = Duration::from_secs(trading.decision_interval_secs);
        tasks.spawn(async move {
            unwind_watcher(&mut unwind_client, store, run.clone(), positions, poll).await
        });
        Ok(())
    }

    /// End-of-cycle position handling. Live cycles leave their legs open;
    /// the next cycle reseeds them from the venue. Paper cycles close
    /// everything so the test account starts the next session flat. The
    /// cycle flag is already down so the teardown opens its own connection.
    async fn teardown(
        &self,
        endpoint: &VenueEndpoint,
        currency: &str,
        store: &Arc<MarketStore>,
        positions: &PositionBook,
        trading: &TradingConfig,
        limits: StreamLimits,
    ) {
        if trading.live {
            let count = positions.len().await;
            positions.clear().await;
            if count > 0 {
                info!(count, "leaving open legs for next-cycle resume");
            }
            return;
        }
        if positions.is_empty().await {
            return;
        }
        match DeribitClient::connect(
            endpoint,
            RunFlag::new(),
            currency.to_string(),
            limits.max_reconnect_attempts,
            limits.reconnect_delay,
        )
        .await
        {
            Ok(mut client) => {
                if let Err(e) = client.cancel_all().await {
                    warn!(error = %e, "teardown cancel_all failed");
                }
                if let Err(e) = close_all_positions(&mut client, store, positions).await {
                    warn!(error = %e, "teardown close-out failed");
                }
                client.close().await;
            }
            Err(e) => warn!(error = %e, "teardown connection failed, legs left open"),
        }
    }
}

/// The cycle timer, the stop-request bridge and the spot drift guard. Each
/// ends the cycle by flipping the run flag, never by erroring.
fn spawn_timers(
    tasks: &mut JoinSet<Result<()>>,
    run: &RunFlag,
    stop: &RunFlag,
    store: &Arc<MarketStore>,
    trading: &TradingConfig,
    initial_price: f64,
) {
    let cycle = Duration::from_secs(trading.cycle_secs);
    {
        let run = run.clone();
        tasks.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(cycle) => {
                    info!("cycle timer elapsed");
                    run.shutdown();
                }
                () = stopped(run.clone()) => {}
            }
            Ok(())
        });
    }
    {
        let run = run.clone();
        let stop = stop.clone();
        tasks.spawn(async move {
            tokio::select! {
                () = stopped(stop) => {
                    info!("stop requested, ending cycle");
                    run.shutdown();
                }
                () = stopped(run.clone()) => {}
            }
            Ok(())
        });
    }
    {
        let run = run.clone();
        let store = Arc::clone(store);
        let guard = trading.price_guard;
        tasks.spawn(async move {
            while run.is_running() {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let spot = store.index_price().await;
                if spot > 0.0 && (spot - initial_price).abs() > guard {
                    info!(spot, initial_price, "price guard tripped, ending cycle");
                    run.shutdown();
                    break;
                }
            }
            Ok(())
        });
    }
}

/// Waits for the cycle to end: the run flag dropping, all tasks finishing,
/// or the first task error (which ends the cycle for everyone).
async fn supervise(tasks: &mut JoinSet<Result<()>>, run: &RunFlag) -> Result<()> {
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    run.shutdown();
                    return Err(e);
                }
                Some(Err(join_err)) => {
                    warn!(error = %join_err, "cycle task aborted unexpectedly");
                    run.shutdown();
                    return Err(BotError::Transport(join_err.to_string()));
                }
                None => return Ok(()),
            },
            () = stopped(run.clone()) => return Ok(()),
        }
    }
}

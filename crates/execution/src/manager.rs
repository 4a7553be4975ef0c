use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use strangle_core::{
    AccountGateway, BotError, MarketStore, OptionKind, OrderGateway, OrderSide, Result, RunFlag,
    TradingConfig,
};
use strangle_strategy::{Leg, LegSelector};
use tracing::{debug, info, warn};

use crate::gates::{MarginModel, RiskGates};
use crate::hedge::{HedgeBook, HedgeOrder};
use crate::ledger::{PremiumSignature, TradeLedger};
use crate::positions::PositionBook;

/// What a single decision tick produced. Mostly useful for tests and the
/// end-of-tick log line.
#[derive(Debug, PartialEq)]
pub enum TickOutcome {
    /// No fresh market data, or no candidate survived selection.
    Idle,
    Skipped(String),
    /// A trade would have been placed; paper mode suppressed submission.
    DryRun,
    Traded,
}

/// The decision loop: picks a strangle off the chain, runs the gates, sells
/// both legs and parks a hedge stop per leg.
pub struct TradeEngine<G> {
    gateway: G,
    store: Arc<MarketStore>,
    run: RunFlag,
    selector: Box<dyn LegSelector>,
    margin: Box<dyn MarginModel>,
    gates: RiskGates,
    ledger: TradeLedger,
    positions: PositionBook,
    hedges: HedgeBook,
    perpetual: String,
    live: bool,
    decision_interval: Duration,
    order_pace: Duration,
    stale_ticks_limit: u32,
    stale_ticks: u32,
    max_tick_failures: u32,
}

impl<G> TradeEngine<G>
where
    G: OrderGateway + AccountGateway,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: G,
        store: Arc<MarketStore>,
        run: RunFlag,
        selector: Box<dyn LegSelector>,
        margin: Box<dyn MarginModel>,
        config: &TradingConfig,
        positions: PositionBook,
        perpetual: String,
    ) -> Self {
        Self {
            gateway,
            store,
            run,
            selector,
            margin,
            gates: RiskGates::new(config),
            ledger: TradeLedger::new(config.max_trades_per_premium),
            positions,
            hedges: HedgeBook::new(),
            perpetual,
            live: config.live,
            decision_interval: Duration::from_secs(config.decision_interval_secs),
            order_pace: Duration::from_millis(config.order_pace_millis),
            stale_ticks_limit: config.stale_ticks_limit,
            stale_ticks: 0,
            max_tick_failures: config.max_reconnect_attempts,
        }
    }

    /// Seeds hedge bookkeeping from stop orders already resting at the
    /// venue, so a restart amends them instead of stacking fresh ones.
    pub fn seed_hedges(&mut self, entries: Vec<(strangle_core::Strike, HedgeOrder)>) {
        for (strike, order) in entries {
            self.hedges.insert(strike, order);
        }
    }

    /// Seeds the dedup ledger from the labels of positions carried over a
    /// restart. Two legs share one label signature, so a pair counts as one
    /// executed trade.
    pub fn seed_ledger(&mut self, positions: &[strangle_core::Position]) {
        let mut legs: HashMap<PremiumSignature, u32> = HashMap::new();
        for position in positions {
            if let Some(sig) = position.label.as_deref().and_then(parse_leg_label) {
                *legs.entry(sig).or_insert(0) += 1;
            }
        }
        for (sig, count) in legs {
            for _ in 0..count.div_ceil(2) {
                self.ledger.record(sig);
            }
        }
    }

    /// Drives [`Self::tick`] until shutdown or a cycle-ending error.
    ///
    /// # Errors
    ///
    /// Propagates fatal gateway errors and the stale-data watchdog, and
    /// escalates [`BotError::ConnectionExhausted`] once ticks have failed
    /// for `max_reconnect_attempts` consecutive intervals.
    pub async fn run(&mut self) -> Result<()> {
        let mut interval = tokio::time::interval(self.decision_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut failed_ticks: u32 = 0;

        while self.run.is_running() {
            interval.tick().await;
            if !self.run.is_running() {
                break;
            }
            match self.tick().await {
                Ok(outcome) => {
                    failed_ticks = 0;
                    if let TickOutcome::Skipped(reason) = outcome {
                        debug!(%reason, "tick skipped");
                    }
                }
                Err(e) if e.ends_cycle() => return Err(e),
                Err(e) => {
                    failed_ticks += 1;
                    if failed_ticks >= self.max_tick_failures {
                        warn!(error = %e, failed_ticks, "giving up after repeated tick failures");
                        return Err(BotError::ConnectionExhausted { attempts: failed_ticks });
                    }
                    warn!(error = %e, "tick failed, retrying next interval");
                }
            }
        }
        Ok(())
    }

    /// One decision pass over the current market state.
    ///
    /// # Errors
    ///
    /// [`BotError::StaleData`] once the feed has been silent for the
    /// configured number of ticks; gateway errors otherwise.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        if !self.store.consume_updated() {
            self.stale_ticks += 1;
            if self.stale_ticks >= self.stale_ticks_limit {
                return Err(BotError::StaleData { ticks: self.stale_ticks });
            }
            return Ok(TickOutcome::Idle);
        }
        self.stale_ticks = 0;

        let spot = self.store.index_price().await;
        if spot <= 0.0 {
            return Ok(TickOutcome::Idle);
        }
        let dvol = self.store.volatility().await;
        let chain = self.store.chain_snapshot().await;

        let candidate = self
            .selector
            .select(&chain, spot)
            .into_iter()
            .max_by(|a, b| a.combined_premium.total_cmp(&b.combined_premium));
        let Some(candidate) = candidate else {
            return Ok(TickOutcome::Idle);
        };

        let signature = match self.gates.check_candidate(&candidate, &self.ledger, dvol) {
            Ok(sig) => sig,
            Err(skip) => return Ok(TickOutcome::Skipped(skip.to_string())),
        };

        let account = self.gateway.account_summary().await?;
        self.store.set_account(account).await;
        let size = self.gates.order_size(account.equity);

        if let Err(skip) =
            self.gates.check_margin(&candidate, &account, size, spot, self.margin.as_ref())
        {
            return Ok(TickOutcome::Skipped(skip.to_string()));
        }

        if !self.live {
            info!(
                %signature,
                put = %candidate.put.instrument.name,
                call = %candidate.call.instrument.name,
                premium = candidate.combined_premium,
                size,
                "paper mode, trade recorded without submission"
            );
            self.ledger.record(signature);
            return Ok(TickOutcome::DryRun);
        }

        let sold_put = self.sell_leg(&candidate.put, size, signature).await?;
        tokio::time::sleep(self.order_pace).await;
        let sold_call = self.sell_leg(&candidate.call, size, signature).await?;

        if sold_put || sold_call {
            self.ledger.record(signature);
            info!(
                %signature,
                premium = candidate.combined_premium,
                put = sold_put,
                call = sold_call,
                "strangle placed"
            );
            Ok(TickOutcome::Traded)
        } else {
            Ok(TickOutcome::Skipped("both legs rejected by venue".into()))
        }
    }

    /// Sells one leg and parks its hedge stop. A non-fatal venue rejection
    /// is isolated so the sibling leg still trades.
    async fn sell_leg(&mut self, leg: &Leg, size: f64, signature: PremiumSignature) -> Result<bool> {
        let label = leg_label(leg, signature);
        let ack = match self
            .gateway
            .sell_limit(&leg.instrument.name, size, leg.quote.bid, &label)
            .await
        {
            Ok(ack) => ack,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(instrument = %leg.instrument.name, error = %e, "leg rejected");
                return Ok(false);
            }
        };
        debug!(instrument = %leg.instrument.name, order_id = %ack.order_id, "leg sold");

        self.positions
            .add(strangle_core::Position {
                instrument_name: leg.instrument.name.clone(),
                strike: leg.instrument.strike,
                kind: leg.instrument.kind,
                size,
                label: Some(label.clone()),
            })
            .await;

        tokio::time::sleep(self.order_pace).await;
        if let Err(e) = self.ensure_hedge(leg, size, &label).await {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(instrument = %leg.instrument.name, error = %e, "hedge placement failed");
        }
        Ok(true)
    }

    /// Places a stop-market hedge on the perpetual at the leg's strike, or
    /// grows the one already resting there.
    async fn ensure_hedge(&mut self, leg: &Leg, size: f64, label: &str) -> Result<()> {
        let strike = leg.instrument.strike;
        let trigger = strike.as_f64();
        let extra = hedge_usd(size, trigger);

        if let Some(total) = self.hedges.grow(strike, extra) {
            let order_id = self
                .hedges
                .get(strike)
                .map(|h| h.order_id.clone())
                .unwrap_or_default();
            self.gateway.edit_order(&order_id, total, trigger).await?;
            debug!(%strike, total, "hedge amended");
            return Ok(());
        }

        // Short put blows up on the way down, short call on the way up.
        let side = match leg.instrument.kind {
            OptionKind::Put => OrderSide::Sell,
            OptionKind::Call => OrderSide::Buy,
        };
        let ack = self
            .gateway
            .place_stop(&self.perpetual, side, extra, trigger, label)
            .await?;
        self.hedges.insert(strike, HedgeOrder { order_id: ack.order_id, size: extra });
        debug!(%strike, usd = extra, "hedge placed");
        Ok(())
    }
}

/// Order label: `strangle-<signature>-<strike>-<P|C>`, the audit trail the
/// restart path parses back into the dedup ledger.
fn leg_label(leg: &Leg, signature: PremiumSignature) -> String {
    let side = match leg.instrument.kind {
        OptionKind::Put => 'P',
        OptionKind::Call => 'C',
    };
    format!("strangle-{signature}-{}-{side}", leg.instrument.strike.0)
}

/// Recovers the premium signature from a leg label written by
/// [`leg_label`]. Foreign or malformed labels yield `None`.
#[must_use]
pub fn parse_leg_label(label: &str) -> Option<PremiumSignature> {
    let mut parts = label.split('-');
    if parts.next()? != "strangle" {
        return None;
    }
    let premium: f64 = parts.next()?.parse().ok()?;
    let _strike: i64 = parts.next()?.parse().ok()?;
    if !matches!(parts.next()?, "P" | "C") || parts.next().is_some() {
        return None;
    }
    Some(PremiumSignature::from_premium(premium))
}

/// Perpetual contracts trade in 10-USD increments.
fn hedge_usd(size: f64, strike: f64) -> f64 {
    ((size * strike) / 10.0).round() * 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use strangle_core::{
        AccountSnapshot, ChainSnapshot, Instrument, OrderAck, Position, Quote, Strike,
    };
    use strangle_strategy::Candidate;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        SellLimit { instrument: String, amount: f64, price: f64 },
        PlaceStop { instrument: String, side: OrderSide, amount: f64, trigger: f64 },
        EditOrder { order_id: String, amount: f64, trigger: f64 },
        AccountSummary,
    }

    #[derive(Default)]
    struct FakeGateway {
        calls: Arc<Mutex<Vec<Call>>>,
        equity: f64,
        available: f64,
        next_order: u64,
    }

    impl FakeGateway {
        fn with_funds(equity: f64, available: f64) -> Self {
            Self { equity, available, ..Self::default() }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl OrderGateway for FakeGateway {
        async fn sell_limit(
            &mut self,
            instrument: &str,
            amount: f64,
            price: f64,
            _label: &str,
        ) -> Result<OrderAck> {
            self.calls.lock().unwrap().push(Call::SellLimit {
                instrument: instrument.into(),
                amount,
                price,
            });
            self.next_order += 1;
            Ok(OrderAck {
                order_id: format!("o-{}", self.next_order),
                order_state: "filled".into(),
                filled_amount: amount,
            })
        }

        async fn place_stop(
            &mut self,
            instrument: &str,
            side: OrderSide,
            amount: f64,
            trigger_price: f64,
            _label: &str,
        ) -> Result<OrderAck> {
            self.calls.lock().unwrap().push(Call::PlaceStop {
                instrument: instrument.into(),
                side,
                amount,
                trigger: trigger_price,
            });
            self.next_order += 1;
            Ok(OrderAck {
                order_id: format!("h-{}", self.next_order),
                order_state: "untriggered".into(),
                filled_amount: 0.0,
            })
        }

        async fn edit_order(
            &mut self,
            order_id: &str,
            amount: f64,
            trigger_price: f64,
        ) -> Result<OrderAck> {
            self.calls.lock().unwrap().push(Call::EditOrder {
                order_id: order_id.into(),
                amount,
                trigger: trigger_price,
            });
            Ok(OrderAck {
                order_id: order_id.into(),
                order_state: "untriggered".into(),
                filled_amount: 0.0,
            })
        }

        async fn close_position(&mut self, _instrument: &str, _price: f64) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl AccountGateway for FakeGateway {
        async fn account_summary(&mut self) -> Result<AccountSnapshot> {
            self.calls.lock().unwrap().push(Call::AccountSummary);
            Ok(AccountSnapshot { equity: self.equity, available_funds: self.available })
        }

        async fn open_positions(&mut self) -> Result<Vec<Position>> {
            Ok(Vec::new())
        }
    }

    struct FixedSelector;

    impl LegSelector for FixedSelector {
        fn select(&self, chain: &ChainSnapshot, _spot: f64) -> Vec<Candidate> {
            let put = chain.puts.get(&Strike(25000)).cloned();
            let call = chain.calls.get(&Strike(27000)).cloned();
            match (put, call) {
                (Some((pi, pq)), Some((ci, cq))) => Candidate::pair(
                    Leg { instrument: pi, quote: pq },
                    Leg { instrument: ci, quote: cq },
                )
                .into_iter()
                .collect(),
                _ => Vec::new(),
            }
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn instrument(strike: i64, kind: OptionKind) -> Instrument {
        let tag = match kind {
            OptionKind::Put => 'P',
            OptionKind::Call => 'C',
        };
        Instrument {
            name: format!("BTC-30AUG26-{strike}-{tag}"),
            strike: Strike(strike),
            kind,
            expiry_tag: "30AUG26".into(),
        }
    }

    async fn seeded_store() -> Arc<MarketStore> {
        let store = Arc::new(MarketStore::default());
        store
            .seed_chain(vec![
                instrument(25000, OptionKind::Put),
                instrument(27000, OptionKind::Call),
            ])
            .await;
        let quote = |bid: f64, delta: f64| Quote {
            bid,
            ask: bid + 0.0005,
            bid_size: 10.0,
            ask_size: 10.0,
            delta,
            ..Quote::empty()
        };
        store.upsert_quote(Strike(25000), OptionKind::Put, quote(0.004, -0.15)).await;
        store.upsert_quote(Strike(27000), OptionKind::Call, quote(0.005, 0.12)).await;
        store.set_index_price(26000.0).await;
        store.set_volatility(55.0).await;
        store
    }

    fn engine(
        gateway: FakeGateway,
        store: Arc<MarketStore>,
        live: bool,
    ) -> TradeEngine<FakeGateway> {
        let config = TradingConfig { live, ..TradingConfig::default() };
        TradeEngine::new(
            gateway,
            store,
            RunFlag::new(),
            Box::new(FixedSelector),
            Box::new(crate::gates::ShortOptionMargin),
            &config,
            PositionBook::new(),
            "BTC-PERPETUAL".into(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn live_tick_sells_both_legs_and_hedges() {
        let store = seeded_store().await;
        let gateway = FakeGateway::with_funds(100.0, 90.0);
        let calls = gateway.calls.clone();
        let mut engine = engine(gateway, store, true);

        assert_eq!(engine.tick().await.unwrap(), TickOutcome::Traded);

        let calls = calls.lock().unwrap().clone();
        let sells: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, Call::SellLimit { .. }))
            .collect();
        assert_eq!(sells.len(), 2);
        let stops: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::PlaceStop { side, trigger, .. } => Some((*side, *trigger)),
                _ => None,
            })
            .collect();
        // Put hedge sells at the put strike, call hedge buys at the call strike.
        assert_eq!(stops, vec![(OrderSide::Sell, 25000.0), (OrderSide::Buy, 27000.0)]);
        assert_eq!(engine.positions.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dry_run_records_without_submitting() {
        let store = seeded_store().await;
        let gateway = FakeGateway::with_funds(100.0, 90.0);
        let calls = gateway.calls.clone();
        let mut engine = engine(gateway, store.clone(), false);

        assert_eq!(engine.tick().await.unwrap(), TickOutcome::DryRun);
        let sig = PremiumSignature::from_premium(0.004 + 0.005);
        assert_eq!(engine.ledger.executed(sig), 1);
        // Account summary is the only gateway traffic.
        assert_eq!(calls.lock().unwrap().clone(), vec![Call::AccountSummary]);

        // The recorded signature now dedups the identical follow-up ticks.
        store.mark_updated();
        assert_eq!(engine.tick().await.unwrap(), TickOutcome::DryRun);
        store.mark_updated();
        assert!(matches!(engine.tick().await.unwrap(), TickOutcome::Skipped(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn thin_funds_skip_without_orders() {
        let store = seeded_store().await;
        // ratio 100/1000 = 0.1 < 0.3
        let gateway = FakeGateway::with_funds(1000.0, 100.0);
        let calls = gateway.calls.clone();
        let mut engine = engine(gateway, store, true);

        assert!(matches!(engine.tick().await.unwrap(), TickOutcome::Skipped(_)));
        assert_eq!(calls.lock().unwrap().clone(), vec![Call::AccountSummary]);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_feed_trips_the_watchdog() {
        let store = seeded_store().await;
        let config = TradingConfig { stale_ticks_limit: 3, ..TradingConfig::default() };
        let mut engine = TradeEngine::new(
            FakeGateway::with_funds(100.0, 90.0),
            store.clone(),
            RunFlag::new(),
            Box::new(FixedSelector),
            Box::new(crate::gates::ShortOptionMargin),
            &config,
            PositionBook::new(),
            "BTC-PERPETUAL".into(),
        );

        // First tick consumes the seed updates; the feed then goes quiet.
        engine.tick().await.unwrap();
        assert_eq!(engine.tick().await.unwrap(), TickOutcome::Idle);
        assert_eq!(engine.tick().await.unwrap(), TickOutcome::Idle);
        let err = engine.tick().await.unwrap_err();
        assert!(matches!(err, BotError::StaleData { ticks: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn second_sale_at_strike_amends_the_hedge() {
        let store = seeded_store().await;
        let gateway = FakeGateway::with_funds(100.0, 90.0);
        let calls = gateway.calls.clone();
        let mut engine = engine(gateway, store.clone(), true);
        engine.seed_hedges(vec![(
            Strike(25000),
            HedgeOrder { order_id: "h-old".into(), size: 2500.0 },
        )]);

        engine.tick().await.unwrap();

        let calls = calls.lock().unwrap().clone();
        let edits: Vec<_> = calls
            .iter()
            .filter_map(|c| match c {
                Call::EditOrder { order_id, amount, .. } => Some((order_id.clone(), *amount)),
                _ => None,
            })
            .collect();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0, "h-old");
        assert!(edits[0].1 > 2500.0);
        // Only the call strike placed a fresh stop.
        let fresh: Vec<_> = calls
            .iter()
            .filter(|c| matches!(c, Call::PlaceStop { .. }))
            .collect();
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn leg_labels_round_trip_their_signature() {
        let sig = PremiumSignature::from_premium(0.009);
        let leg = Leg {
            instrument: instrument(25000, OptionKind::Put),
            quote: Quote::empty(),
        };
        let label = leg_label(&leg, sig);
        assert_eq!(label, "strangle-0.0090-25000-P");
        assert_eq!(parse_leg_label(&label), Some(sig));

        assert_eq!(parse_leg_label("strangle-0.0090-25000"), None);
        assert_eq!(parse_leg_label("manual-0.0090-25000-P"), None);
        assert_eq!(parse_leg_label(""), None);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_reseeds_dedup_from_position_labels() {
        let store = seeded_store().await;
        let gateway = FakeGateway::with_funds(100.0, 90.0);
        let calls = gateway.calls.clone();
        let mut engine = engine(gateway, store, true);

        // Two strangles at signature 0.0090 survived a restart; with the
        // default cap of two the signature is already exhausted.
        let carried: Vec<Position> = [(25000, 'P'), (27000, 'C'), (25000, 'P'), (27000, 'C')]
            .into_iter()
            .map(|(strike, side)| Position {
                instrument_name: format!("BTC-30AUG26-{strike}-{side}"),
                strike: Strike(strike),
                kind: if side == 'P' { OptionKind::Put } else { OptionKind::Call },
                size: 0.1,
                label: Some(format!("strangle-0.0090-{strike}-{side}")),
            })
            .collect();
        engine.seed_ledger(&carried);

        // The identical candidate is deduplicated before any RPC goes out.
        assert!(matches!(engine.tick().await.unwrap(), TickOutcome::Skipped(_)));
        assert!(calls.lock().unwrap().is_empty());
    }

    struct DeadGateway;

    #[async_trait::async_trait]
    impl OrderGateway for DeadGateway {
        async fn sell_limit(&mut self, _: &str, _: f64, _: f64, _: &str) -> Result<OrderAck> {
            Err(BotError::Transport("socket reset".into()))
        }

        async fn place_stop(
            &mut self,
            _: &str,
            _: OrderSide,
            _: f64,
            _: f64,
            _: &str,
        ) -> Result<OrderAck> {
            Err(BotError::Transport("socket reset".into()))
        }

        async fn edit_order(&mut self, _: &str, _: f64, _: f64) -> Result<OrderAck> {
            Err(BotError::Transport("socket reset".into()))
        }

        async fn close_position(&mut self, _: &str, _: f64) -> Result<()> {
            Err(BotError::Transport("socket reset".into()))
        }
    }

    #[async_trait::async_trait]
    impl AccountGateway for DeadGateway {
        async fn account_summary(&mut self) -> Result<AccountSnapshot> {
            Err(BotError::Transport("socket reset".into()))
        }

        async fn open_positions(&mut self) -> Result<Vec<Position>> {
            Err(BotError::Transport("socket reset".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dead_gateway_exhausts_the_retry_budget() {
        let store = seeded_store().await;
        let config = TradingConfig {
            live: true,
            max_reconnect_attempts: 3,
            ..TradingConfig::default()
        };
        let mut engine = TradeEngine::new(
            DeadGateway,
            store.clone(),
            RunFlag::new(),
            Box::new(FixedSelector),
            Box::new(crate::gates::ShortOptionMargin),
            &config,
            PositionBook::new(),
            "BTC-PERPETUAL".into(),
        );

        // Keep the feed fresh so the stale watchdog stays quiet; the
        // transport failures alone must escalate.
        let feeder = tokio::spawn(async move {
            loop {
                store.mark_updated();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });
        let err = engine.run().await.unwrap_err();
        feeder.abort();

        assert!(matches!(err, BotError::ConnectionExhausted { attempts: 3 }));
        assert!(err.ends_cycle());
    }
}

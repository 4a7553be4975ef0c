//! Concurrency-safe aggregate of live market and account state.
//!
//! One `MarketStore` is shared by every stream task and the decision loop
//! for the length of a cycle. Writers touch disjoint sub-keys (one quote,
//! one price, one account snapshot per write), so every update is a single
//! short critical section and no multi-field invariant spans two writers.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::RwLock;

use crate::types::{AccountSnapshot, ChainSide, ChainSnapshot, Instrument, OptionKind, Quote, Strike};

#[derive(Debug, Default)]
struct Chain {
    puts: ChainSide,
    calls: ChainSide,
}

/// Shared market-state store for one trading cycle.
#[derive(Debug, Default)]
pub struct MarketStore {
    chain: RwLock<Chain>,
    index_price: RwLock<f64>,
    volatility: RwLock<f64>,
    account: RwLock<Option<AccountSnapshot>>,
    updated: AtomicBool,
}

impl MarketStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the chain with the instruments picked for this cycle. Quotes
    /// start empty (NaN bid/ask) until the first ticker push arrives.
    pub async fn seed_chain(&self, instruments: Vec<Instrument>) {
        let mut chain = self.chain.write().await;
        chain.puts.clear();
        chain.calls.clear();
        for inst in instruments {
            let side = match inst.kind {
                OptionKind::Put => &mut chain.puts,
                OptionKind::Call => &mut chain.calls,
            };
            side.insert(inst.strike, (inst, Quote::empty()));
        }
    }

    /// Replaces the whole quote for one strike/side. All fields of a quote
    /// arrive in a single ticker message, so this never tears.
    pub async fn upsert_quote(&self, strike: Strike, kind: OptionKind, quote: Quote) {
        let mut chain = self.chain.write().await;
        let side = match kind {
            OptionKind::Put => &mut chain.puts,
            OptionKind::Call => &mut chain.calls,
        };
        if let Some((_, slot)) = side.get_mut(&strike) {
            *slot = quote;
            drop(chain);
            self.mark_updated();
        } else {
            tracing::debug!(%strike, %kind, "quote for strike outside this cycle's chain, dropped");
        }
    }

    /// Cloned view of the chain for the pure selector.
    pub async fn chain_snapshot(&self) -> ChainSnapshot {
        let chain = self.chain.read().await;
        ChainSnapshot { puts: chain.puts.clone(), calls: chain.calls.clone() }
    }

    /// Quote lookup by strike and side, if traded this cycle.
    pub async fn quote(&self, strike: Strike, kind: OptionKind) -> Option<Quote> {
        let chain = self.chain.read().await;
        let side = match kind {
            OptionKind::Put => &chain.puts,
            OptionKind::Call => &chain.calls,
        };
        side.get(&strike).map(|(_, quote)| *quote)
    }

    pub async fn set_index_price(&self, price: f64) {
        *self.index_price.write().await = price;
        self.mark_updated();
    }

    pub async fn index_price(&self) -> f64 {
        *self.index_price.read().await
    }

    pub async fn set_volatility(&self, dvol: f64) {
        *self.volatility.write().await = dvol;
    }

    pub async fn volatility(&self) -> f64 {
        *self.volatility.read().await
    }

    pub async fn set_account(&self, snapshot: AccountSnapshot) {
        *self.account.write().await = Some(snapshot);
    }

    pub async fn account(&self) -> Option<AccountSnapshot> {
        *self.account.read().await
    }

    /// Flags that some stream delivered fresh data since the last
    /// `consume_updated` call.
    pub fn mark_updated(&self) {
        self.updated.store(true, Ordering::Release);
    }

    /// Atomic test-and-clear of the freshness flag. Drives the decision-loop
    /// cadence and the stale-data watchdog.
    pub fn consume_updated(&self) -> bool {
        self.updated.swap(false, Ordering::AcqRel)
    }
}

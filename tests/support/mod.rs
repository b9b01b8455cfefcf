// Shared fakes for integration tests
// In-memory ledger, fixed-rate venues and scripted relays
//
// Numan Thabit 2025 Nov

#![allow(dead_code)]

use async_trait::async_trait;
use relay_aggr::control::AdmissionControl;
use relay_aggr::errors::{AggrError, RelayError, VenueError};
use relay_aggr::metrics::MetricsCollector;
use relay_aggr::relay::{RelayAggregator, RelayPolicy};
use relay_aggr::router::{ArbitrageDetector, BundleBuilder, RouteOptimizer, Router};
use relay_aggr::transport::{Block, BundlePayload, Ledger, PoolState, RelayClient, RelayReceipt};
use relay_aggr::venues::{PoolConfig, PricingFamily, Quote, Venue, VenueAdapter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ledger with a movable head and hand-placed block contents.
#[derive(Default)]
pub struct MemoryLedger {
    current: AtomicU64,
    blocks: Mutex<HashMap<u64, Vec<String>>>,
}

impl MemoryLedger {
    pub fn at(block: u64) -> Arc<Self> {
        Arc::new(Self {
            current: AtomicU64::new(block),
            blocks: Mutex::new(HashMap::new()),
        })
    }

    pub fn set_current(&self, block: u64) {
        self.current.store(block, Ordering::SeqCst);
    }

    pub fn include(&self, block: u64, tx: impl Into<String>) {
        self.blocks.lock().unwrap().entry(block).or_default().push(tx.into());
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_quote(
        &self,
        venue: &str,
        _token_in: &str,
        _token_out: &str,
        _amount_in: f64,
        _fee_tier: Option<u32>,
    ) -> Result<f64, AggrError> {
        Err(AggrError::Provider(format!("no quoter for {venue}")))
    }

    async fn get_pool_state(&self, _venue: &str, pool_ref: &str) -> Result<PoolState, AggrError> {
        Err(AggrError::Provider(format!("unknown pool {pool_ref}")))
    }

    async fn get_block(&self, number: u64) -> Result<Block, AggrError> {
        Ok(Block {
            number,
            transactions: self.blocks.lock().unwrap().get(&number).cloned().unwrap_or_default(),
        })
    }

    async fn get_current_block(&self) -> Result<u64, AggrError> {
        Ok(self.current.load(Ordering::SeqCst))
    }
}

/// Venue quoting `amount_in * rate` for each configured pair direction.
pub struct FixedRateVenue {
    venue: Venue,
    rates: HashMap<(String, String), f64>,
}

impl FixedRateVenue {
    pub fn new(id: &str, rates: &[(&str, &str, f64)]) -> Self {
        let pools = rates
            .iter()
            .map(|(a, b, _)| PoolConfig {
                pool_ref: format!("{id}:{a}/{b}"),
                token_a: a.to_string(),
                token_b: b.to_string(),
                fee: 3000,
                weights: None,
                amplification: None,
            })
            .collect();
        Self {
            venue: Venue {
                id: id.to_string(),
                family: PricingFamily::ConstantProduct,
                fee_tiers: vec![],
                gas_estimate_base: 100_000,
                pools,
            },
            rates: rates
                .iter()
                .map(|(a, b, r)| ((a.to_string(), b.to_string()), *r))
                .collect(),
        }
    }
}

#[async_trait]
impl VenueAdapter for FixedRateVenue {
    fn venue(&self) -> &Venue {
        &self.venue
    }

    async fn quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
        fee_tier: Option<u32>,
    ) -> Result<Quote, VenueError> {
        let rate = self
            .rates
            .get(&(token_in.to_string(), token_out.to_string()))
            .ok_or_else(|| self.venue.no_pool(token_in, token_out))?;
        let pool = self
            .venue
            .find_pool(token_in, token_out, fee_tier)
            .ok_or_else(|| self.venue.no_pool(token_in, token_out))?;
        Ok(Quote {
            venue: self.venue.id.clone(),
            family: self.venue.family,
            token_in: token_in.to_string(),
            token_out: token_out.to_string(),
            amount_in,
            amount_out: amount_in * rate,
            price_impact: 0.002,
            gas_estimate: self.venue.gas_estimate_base,
            pool_ref: pool.pool_ref.clone(),
            fee: Some(pool.fee),
        })
    }
}

/// Concentrated venue with one pool per listed (pair, fee) and a rate per
/// direction and fee. Counts every quote it serves.
pub struct TieredVenue {
    venue: Venue,
    rates: HashMap<(String, String, u32), f64>,
    pub quotes: AtomicUsize,
}

impl TieredVenue {
    pub fn new(id: &str, fee_tiers: &[u32], pools: &[(&str, &str, u32, f64)]) -> Self {
        Self {
            venue: Venue {
                id: id.to_string(),
                family: PricingFamily::Concentrated,
                fee_tiers: fee_tiers.to_vec(),
                gas_estimate_base: 150_000,
                pools: pools
                    .iter()
                    .map(|(a, b, fee, _)| PoolConfig {
                        pool_ref: format!("{id}:{a}/{b}:{fee}"),
                        token_a: a.to_string(),
                        token_b: b.to_string(),
                        fee: *fee,
                        weights: None,
                        amplification: None,
                    })
                    .collect(),
            },
            rates: pools
                .iter()
                .map(|(a, b, fee, r)| ((a.to_string(), b.to_string(), *fee), *r))
                .collect(),
            quotes: AtomicUsize::new(0),
        }
    }

    pub fn quotes(&self) -> usize {
        self.quotes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VenueAdapter for TieredVenue {
    fn venue(&self) -> &Venue {
        &self.venue
    }

    async fn quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
        fee_tier: Option<u32>,
    ) -> Result<Quote, VenueError> {
        self.quotes.fetch_add(1, Ordering::SeqCst);
        let pool = self
            .venue
            .find_pool(token_in, token_out, fee_tier)
            .ok_or_else(|| self.venue.no_pool(token_in, token_out))?;
        let rate = self
            .rates
            .get(&(token_in.to_string(), token_out.to_string(), pool.fee))
            .ok_or_else(|| self.venue.no_pool(token_in, token_out))?;
        Ok(Quote {
            venue: self.venue.id.clone(),
            family: self.venue.family,
            token_in: token_in.to_string(),
            token_out: token_out.to_string(),
            amount_in,
            amount_out: amount_in * rate,
            price_impact: 0.001,
            gas_estimate: self.venue.gas_estimate_base,
            pool_ref: pool.pool_ref.clone(),
            fee: Some(pool.fee),
        })
    }
}

/// Relay that accepts or rejects every bundle and counts submissions.
pub struct ScriptedRelay {
    id: String,
    accept: bool,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<BundlePayload>>,
}

impl ScriptedRelay {
    pub fn accepting(id: &str) -> Arc<Self> {
        Arc::new(Self::new(id, true))
    }

    pub fn rejecting(id: &str) -> Arc<Self> {
        Arc::new(Self::new(id, false))
    }

    fn new(id: &str, accept: bool) -> Self {
        Self {
            id: id.to_string(),
            accept,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayClient for ScriptedRelay {
    fn id(&self) -> &str {
        &self.id
    }

    async fn submit_bundle(&self, payload: &BundlePayload) -> Result<RelayReceipt, RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(payload.clone());
        if self.accept {
            Ok(RelayReceipt {
                bundle_hash: format!("{}:{}", self.id, payload.bundle_id),
                tx_hashes: vec![],
                cost: Some(0.0),
            })
        } else {
            Err(RelayError::Rejected {
                relay: self.id.clone(),
                reason: "bundle simulation failed".into(),
            })
        }
    }
}

pub fn optimizer(venues: Vec<FixedRateVenue>, intermediates: &[&str]) -> Arc<RouteOptimizer> {
    let adapters = venues
        .into_iter()
        .map(|v| Arc::new(v) as Arc<dyn VenueAdapter>)
        .collect();
    Arc::new(optimizer_over(adapters, intermediates))
}

/// Unshared optimizer, left open for builder tweaks.
pub fn optimizer_over(adapters: Vec<Arc<dyn VenueAdapter>>, intermediates: &[&str]) -> RouteOptimizer {
    RouteOptimizer::new(
        adapters,
        AdmissionControl::new(32, None),
        Duration::from_millis(500),
        intermediates.iter().map(|t| t.to_string()).collect(),
    )
}

pub fn aggregator(ledger: Arc<MemoryLedger>) -> Arc<RelayAggregator> {
    Arc::new(RelayAggregator::new(
        ledger,
        Arc::new(MetricsCollector::new()),
        RelayPolicy::default(),
    ))
}

/// Full pipeline over the 2450/2465 ETH/USDC spread.
pub async fn spread_router(ledger: Arc<MemoryLedger>, relays: Vec<Arc<ScriptedRelay>>) -> Arc<Router> {
    let optimizer = optimizer(
        vec![
            FixedRateVenue::new("low", &[("ETH", "USDC", 2450.0)]),
            FixedRateVenue::new("high", &[("ETH", "USDC", 2465.0)]),
        ],
        &[],
    );
    let detector = Arc::new(ArbitrageDetector::new(optimizer.clone(), 1));
    let aggregator = aggregator(ledger.clone());
    for relay in relays {
        aggregator.register_relay(relay as Arc<dyn RelayClient>).await;
    }
    aggregator.recompute_scores().await;
    Arc::new(Router::new(
        optimizer,
        detector,
        BundleBuilder::new(30, 2, 3),
        aggregator,
        ledger,
    ))
}

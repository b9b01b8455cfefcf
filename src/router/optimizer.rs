// Route optimizer - discovers and ranks swap paths across venues
// Fans quotes out over every venue adapter and fee tier, composes bounded
// multi-hop paths through a curated intermediate set and scores the results
//
// Numan Thabit 2025 Nov

use crate::control::AdmissionControl;
use crate::errors::VenueError;
use crate::metrics::{QUOTE_FAILURES, REQ_LATENCY};
use crate::router::routes::{RankBy, Route, ScoringPolicy};
use crate::router::validation::validate_route;
use crate::venues::{Quote, VenueAdapter};
use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Hard ceiling on intermediate hops regardless of the request.
pub const MAX_HOPS_LIMIT: usize = 3;

fn default_max_hops() -> usize {
    1
}

/// Route search request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RouteQuery {
    pub token_in: String,
    pub token_out: String,
    pub amount_in: f64,
    /// Intermediate hops allowed; a route has at most `max_hops + 1` legs.
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,
    #[serde(default)]
    pub rank_by: RankBy,
    /// Output-token units per gas unit, used for profitability.
    #[serde(default)]
    pub gas_price: f64,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RouteQuery {
    pub fn new(token_in: impl Into<String>, token_out: impl Into<String>, amount_in: f64, max_hops: usize) -> Self {
        Self {
            token_in: token_in.into(),
            token_out: token_out.into(),
            amount_in,
            max_hops,
            rank_by: RankBy::default(),
            gas_price: 0.0,
            limit: None,
        }
    }

    pub fn rank_by(mut self, rank_by: RankBy) -> Self {
        self.rank_by = rank_by;
        self
    }

    pub fn gas_price(mut self, gas_price: f64) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Partial path: legs quoted so far.
type Path = Vec<Quote>;

pub struct RouteOptimizer {
    adapters: Vec<Arc<dyn VenueAdapter>>,
    control: AdmissionControl,
    quote_timeout: Duration,
    intermediates: Vec<String>,
    policy: ScoringPolicy,
    beam_width: usize,
}

impl RouteOptimizer {
    pub fn new(
        adapters: Vec<Arc<dyn VenueAdapter>>,
        control: AdmissionControl,
        quote_timeout: Duration,
        intermediates: Vec<String>,
    ) -> Self {
        Self {
            adapters,
            control,
            quote_timeout,
            intermediates,
            policy: ScoringPolicy::default(),
            beam_width: 4,
        }
    }

    pub fn with_policy(mut self, policy: ScoringPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_beam_width(mut self, beam_width: usize) -> Self {
        self.beam_width = beam_width.max(1);
        self
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    pub fn venue_count(&self) -> usize {
        self.adapters.len()
    }

    /// Discover, score and rank routes. Venues that fail or time out are
    /// skipped; an empty result means no feasible route.
    #[tracing::instrument(skip_all, fields(token_in = %query.token_in, token_out = %query.token_out, amount_in = query.amount_in, max_hops = query.max_hops))]
    pub async fn find_routes(&self, query: &RouteQuery) -> Vec<Route> {
        if query.token_in == query.token_out || !(query.amount_in.is_finite() && query.amount_in > 0.0) {
            return Vec::new();
        }
        let max_hops = query.max_hops.min(MAX_HOPS_LIMIT);

        let mut paths: Vec<Path> = self
            .quote_direct(&query.token_in, &query.token_out, query.amount_in)
            .await
            .into_iter()
            .map(|q| vec![q])
            .collect();

        let mut frontier: Vec<Path> = vec![Vec::new()];
        for depth in 1..=max_hops {
            frontier = self.extend(frontier, query, depth).await;
            if frontier.is_empty() {
                break;
            }
            paths.extend(self.close(&frontier, query).await);
        }

        let mut by_id: HashMap<String, Route> = HashMap::new();
        for path in &paths {
            let Some(route) = Route::from_quotes(path, query.gas_price, &self.policy) else {
                continue;
            };
            if !validate_route(&route, Some((&query.token_in, &query.token_out)), max_hops).is_valid {
                continue;
            }
            match by_id.get(&route.id) {
                Some(existing) if existing.expected_amount_out >= route.expected_amount_out => {}
                _ => {
                    by_id.insert(route.id.clone(), route);
                }
            }
        }

        let mut routes: Vec<Route> = by_id.into_values().collect();
        routes.sort_by(|a, b| {
            b.metric(query.rank_by, &self.policy)
                .total_cmp(&a.metric(query.rank_by, &self.policy))
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = query.limit {
            routes.truncate(limit);
        }

        info!(
            candidates = paths.len(),
            routes = routes.len(),
            best = routes.first().map(|r| r.combined_score),
            "route search complete"
        );
        routes
    }

    /// Direct quotes on every venue holding the pair, every fee tier for
    /// concentrated venues. Failed quotes are dropped.
    pub async fn quote_direct(&self, token_in: &str, token_out: &str, amount_in: f64) -> Vec<Quote> {
        let mut pending = Vec::new();
        for adapter in &self.adapters {
            for tier in adapter.venue().quote_tiers() {
                if adapter.venue().find_pool(token_in, token_out, tier).is_none() {
                    continue;
                }
                pending.push(self.quote_one(adapter.as_ref(), token_in, token_out, amount_in, tier));
            }
        }
        join_all(pending)
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }

    /// Quote one specific venue and tier.
    pub async fn quote_venue(
        &self,
        venue_id: &str,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
        fee_tier: Option<u32>,
    ) -> Result<Quote, VenueError> {
        let adapter = self
            .adapters
            .iter()
            .find(|a| a.venue().id == venue_id)
            .ok_or_else(|| VenueError::NoPool {
                venue: venue_id.to_string(),
                token_in: token_in.to_string(),
                token_out: token_out.to_string(),
            })?;
        self.quote_one(adapter.as_ref(), token_in, token_out, amount_in, fee_tier)
            .await
    }

    async fn quote_one(
        &self,
        adapter: &dyn VenueAdapter,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
        fee_tier: Option<u32>,
    ) -> Result<Quote, VenueError> {
        let venue = adapter.venue().id.as_str();
        let _permit = self.control.acquire().await.map_err(|e| VenueError::Ledger {
            venue: venue.to_string(),
            message: e.to_string(),
        })?;

        let start = Instant::now();
        let result = match tokio::time::timeout(
            self.quote_timeout,
            adapter.quote(token_in, token_out, amount_in, fee_tier),
        )
        .await
        {
            Ok(r) => r,
            Err(_) => Err(VenueError::Timeout {
                venue: venue.to_string(),
                timeout_ms: self.quote_timeout.as_millis() as u64,
            }),
        };
        REQ_LATENCY
            .with_label_values(&["venue", venue])
            .observe(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            QUOTE_FAILURES.with_label_values(&[venue, e.kind()]).inc();
            debug!(venue, token_in, token_out, fee_tier, error = %e, "quote skipped");
        }
        result
    }

    fn path_head<'a>(path: &'a Path, query: &'a RouteQuery) -> (&'a str, f64) {
        match path.last() {
            Some(q) => (q.token_out.as_str(), q.amount_out),
            None => (query.token_in.as_str(), query.amount_in),
        }
    }

    /// Extend every partial path by one leg into each unused intermediate.
    /// Past the first intermediate only the best `beam_width` partials per
    /// frontier token survive.
    async fn extend(&self, frontier: Vec<Path>, query: &RouteQuery, depth: usize) -> Vec<Path> {
        let mut pending = Vec::new();
        for path in &frontier {
            let (head, amount) = Self::path_head(path, query);
            for mid in &self.intermediates {
                let visited = path.iter().any(|q| &q.token_in == mid || &q.token_out == mid);
                if *mid == query.token_in || *mid == query.token_out || mid == head || visited {
                    continue;
                }
                let base = path.clone();
                let mid = mid.clone();
                pending.push(async move {
                    self.quote_direct(head, &mid, amount)
                        .await
                        .into_iter()
                        .map(|q| {
                            let mut next = base.clone();
                            next.push(q);
                            next
                        })
                        .collect::<Vec<Path>>()
                });
            }
        }
        let mut extended: Vec<Path> = join_all(pending).await.into_iter().flatten().collect();

        if depth >= 2 {
            let mut per_token: HashMap<String, Vec<Path>> = HashMap::new();
            for path in extended.drain(..) {
                let token = path.last().map(|q| q.token_out.clone()).unwrap_or_default();
                per_token.entry(token).or_default().push(path);
            }
            for (_, mut group) in per_token {
                group.sort_by(|a, b| {
                    let out = |p: &Path| p.last().map(|q| q.amount_out).unwrap_or(0.0);
                    out(b).total_cmp(&out(a))
                });
                group.truncate(self.beam_width);
                extended.extend(group);
            }
        }
        debug!(depth, partials = extended.len(), "frontier extended");
        extended
    }

    /// Close every partial path with a final leg into the target token.
    async fn close(&self, frontier: &[Path], query: &RouteQuery) -> Vec<Path> {
        let pending = frontier.iter().map(|path| {
            let (head, amount) = Self::path_head(path, query);
            async move {
                self.quote_direct(head, &query.token_out, amount)
                    .await
                    .into_iter()
                    .map(|q| {
                        let mut closed = path.clone();
                        closed.push(q);
                        closed
                    })
                    .collect::<Vec<Path>>()
            }
        });
        join_all(pending).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::errors::VenueError;
    use crate::venues::{PoolConfig, PricingFamily, Quote, Venue, VenueAdapter};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Venue fake quoting from a fixed per-pair rate table.
    pub struct RateVenue {
        venue: Venue,
        rates: HashMap<(String, String), f64>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl RateVenue {
        pub fn new(id: &str, family: PricingFamily, rates: &[(&str, &str, f64)]) -> Self {
            let pools = rates
                .iter()
                .map(|(a, b, _)| PoolConfig {
                    pool_ref: format!("{id}-{a}-{b}"),
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
                    family,
                    fee_tiers: vec![],
                    gas_estimate_base: 100_000,
                    pools,
                },
                rates: rates
                    .iter()
                    .map(|(a, b, r)| ((a.to_string(), b.to_string()), *r))
                    .collect(),
                delay: None,
                fail: false,
            }
        }

        pub fn slow(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl VenueAdapter for RateVenue {
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
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(VenueError::Ledger {
                    venue: self.venue.id.clone(),
                    message: "connection refused".into(),
                });
            }
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
                price_impact: 0.001,
                gas_estimate: self.venue.gas_estimate_base,
                pool_ref: pool.pool_ref.clone(),
                fee: Some(pool.fee),
            })
        }
    }
}

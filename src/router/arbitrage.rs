// Arbitrage detection module
// Closed-loop search over the route optimizer in both directions, plus a
// fast fixed-pair scan for spreads between venues quoting the same pair
//
// Numan Thabit 2025 Nov

use crate::router::optimizer::{RouteOptimizer, RouteQuery};
use crate::router::routes::{RankBy, Route};
use crate::venues::Quote;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    /// Forward route followed by an optimizer-found return route.
    Loop,
    /// Sell on one venue, buy back on another through the same pool pair.
    CrossVenue,
}

/// A closed route `token_a → … → token_b → … → token_a` expected to net a
/// profit. All amounts are denominated in `profit_token` (the pair's
/// `token_b`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    pub id: String,
    pub kind: OpportunityKind,
    pub token_a: String,
    pub token_b: String,
    pub route: Route,
    pub input_amount: f64,
    pub final_amount: f64,
    pub gas_cost: f64,
    pub net_profit: f64,
    pub profit_token: String,
}

pub struct ArbitrageDetector {
    optimizer: Arc<RouteOptimizer>,
    max_hops: usize,
    /// Forward routes whose return leg is searched.
    loop_fanout: usize,
}

impl ArbitrageDetector {
    pub fn new(optimizer: Arc<RouteOptimizer>, max_hops: usize) -> Self {
        Self {
            optimizer,
            max_hops,
            loop_fanout: 5,
        }
    }

    pub fn with_loop_fanout(mut self, loop_fanout: usize) -> Self {
        self.loop_fanout = loop_fanout.max(1);
        self
    }

    /// `gas_cost` is in `token_b` units.
    #[tracing::instrument(skip_all, fields(token_a = %token_a, token_b = %token_b, amount_in = amount_in, gas_cost = gas_cost))]
    pub async fn find_opportunities(
        &self,
        token_a: &str,
        token_b: &str,
        amount_in: f64,
        gas_cost: f64,
        max_results: usize,
    ) -> Vec<Opportunity> {
        if token_a == token_b || max_results == 0 {
            return Vec::new();
        }
        let (loops, spreads) = futures::join!(
            self.loop_search(token_a, token_b, amount_in, gas_cost),
            self.cross_venue(token_a, token_b, amount_in, gas_cost),
        );
        let found = rank(loops.into_iter().chain(spreads), max_results);
        info!(opportunities = found.len(), best = found.first().map(|o| o.net_profit), "arbitrage scan complete");
        found
    }

    /// Fast path over a fixed pair list, skipping the loop search.
    pub async fn scan_cross_venue(
        &self,
        pairs: &[(String, String)],
        amount_in: f64,
        gas_cost: f64,
        max_results: usize,
    ) -> Vec<Opportunity> {
        let scans = pairs
            .iter()
            .map(|(a, b)| self.cross_venue(a, b, amount_in, gas_cost));
        let found = join_all(scans).await.into_iter().flatten();
        rank(found, max_results)
    }

    async fn loop_search(&self, token_a: &str, token_b: &str, amount_in: f64, gas_cost: f64) -> Vec<Opportunity> {
        let forward_query =
            RouteQuery::new(token_a, token_b, amount_in, self.max_hops).rank_by(RankBy::AmountOut);
        let mut forward = self.optimizer.find_routes(&forward_query).await;
        forward.truncate(self.loop_fanout);

        let reverse_lookups = forward.iter().map(|f| {
            let query = RouteQuery::new(token_b, token_a, f.expected_amount_out, self.max_hops)
                .rank_by(RankBy::AmountOut);
            async move { self.optimizer.find_routes(&query).await }
        });
        let reverses = join_all(reverse_lookups).await;

        let mut found = Vec::new();
        for (f, returns) in forward.iter().zip(reverses) {
            // Value the returned token_a at the forward route's rate.
            let rate = f.expected_amount_out / f.amount_in;
            let input_amount = f.expected_amount_out;
            for r in returns {
                let final_amount = r.expected_amount_out * rate;
                let net_profit = final_amount - input_amount - gas_cost;
                if net_profit <= 0.0 {
                    continue;
                }
                let route = f.chain(&r);
                debug!(route = %route.id, net_profit, "loop opportunity");
                found.push(Opportunity {
                    id: route.id.clone(),
                    kind: OpportunityKind::Loop,
                    token_a: token_a.to_string(),
                    token_b: token_b.to_string(),
                    route,
                    input_amount,
                    final_amount,
                    gas_cost,
                    net_profit,
                    profit_token: token_b.to_string(),
                });
            }
        }
        found
    }

    async fn cross_venue(&self, token_a: &str, token_b: &str, amount_in: f64, gas_cost: f64) -> Vec<Opportunity> {
        let quotes = self.optimizer.quote_direct(token_a, token_b, amount_in).await;
        let mut found = Vec::new();
        for high in &quotes {
            for low in &quotes {
                if high.venue == low.venue || high.amount_out <= low.amount_out {
                    continue;
                }
                let net_profit = high.amount_out - low.amount_out - gas_cost;
                if net_profit <= 0.0 {
                    continue;
                }
                let Some(route) = Route::from_quotes(
                    &[high.clone(), buy_back(low)],
                    0.0,
                    self.optimizer.policy(),
                ) else {
                    continue;
                };
                debug!(high = %high.venue, low = %low.venue, net_profit, "cross-venue spread");
                found.push(Opportunity {
                    id: route.id.clone(),
                    kind: OpportunityKind::CrossVenue,
                    token_a: token_a.to_string(),
                    token_b: token_b.to_string(),
                    route,
                    input_amount: low.amount_out,
                    final_amount: high.amount_out,
                    gas_cost,
                    net_profit,
                    profit_token: token_b.to_string(),
                });
            }
        }
        found
    }
}

/// Reverse leg through the same pool, priced at the quoted rate.
fn buy_back(low: &Quote) -> Quote {
    Quote {
        venue: low.venue.clone(),
        family: low.family,
        token_in: low.token_out.clone(),
        token_out: low.token_in.clone(),
        amount_in: low.amount_out,
        amount_out: low.amount_in,
        price_impact: low.price_impact,
        gas_estimate: low.gas_estimate,
        pool_ref: low.pool_ref.clone(),
        fee: low.fee,
    }
}

/// Dedup by closed-route id keeping the higher profit, then rank.
fn rank(found: impl IntoIterator<Item = Opportunity>, max_results: usize) -> Vec<Opportunity> {
    let mut by_id: HashMap<String, Opportunity> = HashMap::new();
    for opp in found {
        match by_id.get(&opp.id) {
            Some(existing) if existing.net_profit >= opp.net_profit => {}
            _ => {
                by_id.insert(opp.id.clone(), opp);
            }
        }
    }
    let mut ranked: Vec<Opportunity> = by_id.into_values().collect();
    ranked.sort_by(|a, b| b.net_profit.total_cmp(&a.net_profit).then_with(|| a.id.cmp(&b.id)));
    ranked.truncate(max_results);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::AdmissionControl;
    use crate::router::optimizer::testing::RateVenue;
    use crate::venues::{PricingFamily, VenueAdapter};
    use std::time::Duration;

    fn detector(venues: Vec<RateVenue>) -> ArbitrageDetector {
        let adapters: Vec<Arc<dyn VenueAdapter>> = venues
            .into_iter()
            .map(|v| Arc::new(v) as Arc<dyn VenueAdapter>)
            .collect();
        let optimizer = RouteOptimizer::new(
            adapters,
            AdmissionControl::new(16, None),
            Duration::from_millis(200),
            vec![],
        );
        ArbitrageDetector::new(Arc::new(optimizer), 1)
    }

    #[tokio::test]
    async fn spread_between_venues_is_found() {
        let d = detector(vec![
            RateVenue::new("low", PricingFamily::ConstantProduct, &[("ETH", "USDC", 2450.0)]),
            RateVenue::new("high", PricingFamily::Concentrated, &[("ETH", "USDC", 2465.0)]),
        ]);

        let found = d.find_opportunities("ETH", "USDC", 10.0, 100.0, 5).await;
        assert_eq!(found.len(), 1);
        let opp = &found[0];
        assert_eq!(opp.kind, OpportunityKind::CrossVenue);
        assert!((opp.net_profit - 50.0).abs() < 1e-6);
        assert!(opp.route.is_closed());
        assert_eq!(opp.route.hops[0].venue, "high");
        assert_eq!(opp.route.hops[1].venue, "low");
        assert!((opp.final_amount - opp.input_amount - opp.gas_cost - opp.net_profit).abs() < 1e-9);

        assert!(d.find_opportunities("ETH", "USDC", 10.0, 200.0, 5).await.is_empty());
    }

    #[tokio::test]
    async fn loop_through_return_route_is_found() {
        let d = detector(vec![
            RateVenue::new("a", PricingFamily::ConstantProduct, &[("ETH", "USDC", 2000.0)]),
            RateVenue::new("b", PricingFamily::ConstantProduct, &[("USDC", "ETH", 0.00051)]),
        ]);
        let found = d.find_opportunities("ETH", "USDC", 1.0, 10.0, 5).await;
        assert_eq!(found.len(), 1);
        let opp = &found[0];
        assert_eq!(opp.kind, OpportunityKind::Loop);
        // 2000 USDC -> 1.02 ETH, worth 2040 USDC at the forward rate.
        assert!((opp.net_profit - 30.0).abs() < 1e-6);
        assert_eq!(opp.route.token_in(), Some("ETH"));
        assert_eq!(opp.route.token_out(), Some("ETH"));
    }

    #[tokio::test]
    async fn results_are_ranked_and_truncated() {
        let d = detector(vec![
            RateVenue::new("v1", PricingFamily::ConstantProduct, &[("ETH", "USDC", 2400.0)]),
            RateVenue::new("v2", PricingFamily::ConstantProduct, &[("ETH", "USDC", 2420.0)]),
            RateVenue::new("v3", PricingFamily::ConstantProduct, &[("ETH", "USDC", 2450.0)]),
        ]);
        let found = d.find_opportunities("ETH", "USDC", 1.0, 0.0, 2).await;
        assert_eq!(found.len(), 2);
        assert!((found[0].net_profit - 50.0).abs() < 1e-9);
        assert!((found[1].net_profit - 30.0).abs() < 1e-9);
    }
}

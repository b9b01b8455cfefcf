// Route types and route scoring logic
// This file defines hops, routes, the tunable scoring policy and the ranking
// metrics used to order optimizer results
//
// Numan Thabit 2025 Nov

use crate::errors::AggrError;
use crate::venues::{fee_fraction, PricingFamily, Quote};
use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Hex content hash over `parts`, separator-delimited.
pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Blake2b512::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let hash = hasher.finalize();
    hex::encode(&hash[..32])
}

/// One swap leg of a route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hop {
    pub venue: String,
    pub family: PricingFamily,
    pub token_in: String,
    pub token_out: String,
    pub pool_ref: String,
    pub fee: Option<u32>,
    pub gas_estimate: u64,
    /// Expected amounts at quote time.
    pub amount_in: f64,
    pub amount_out: f64,
    pub price_impact: f64,
}

impl From<&Quote> for Hop {
    fn from(q: &Quote) -> Self {
        Self {
            venue: q.venue.clone(),
            family: q.family,
            token_in: q.token_in.clone(),
            token_out: q.token_out.clone(),
            pool_ref: q.pool_ref.clone(),
            fee: q.fee,
            gas_estimate: q.gas_estimate,
            amount_in: q.amount_in,
            amount_out: q.amount_out,
            price_impact: q.price_impact,
        }
    }
}

/// Scored swap path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    /// Content hash of the hop chain (venue, pool, direction, fee).
    pub id: String,
    pub hops: Vec<Hop>,
    pub amount_in: f64,
    pub expected_amount_out: f64,
    /// Summed over hops, capped at 1.0.
    pub price_impact: f64,
    pub gas_estimate: u64,
    pub execution_time_estimate_ms: u64,
    pub reliability: f64,
    pub profitability: f64,
    pub risk_score: f64,
    pub combined_score: f64,
}

/// Per-family reliability baselines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyBaselines {
    pub constant_product: f64,
    pub concentrated: f64,
    pub weighted: f64,
    pub stable: f64,
}

impl Default for FamilyBaselines {
    fn default() -> Self {
        Self {
            constant_product: 0.95,
            concentrated: 0.9,
            weighted: 0.85,
            stable: 0.9,
        }
    }
}

impl FamilyBaselines {
    pub fn for_family(&self, family: PricingFamily) -> f64 {
        match family {
            PricingFamily::ConstantProduct => self.constant_product,
            PricingFamily::Concentrated => self.concentrated,
            PricingFamily::Weighted => self.weighted,
            PricingFamily::Stable => self.stable,
        }
    }
}

/// Heuristic scoring constants. Uncalibrated; treat as policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    pub baselines: FamilyBaselines,
    /// Reliability lost per hop beyond the first.
    pub hop_reliability_penalty: f64,
    /// Risk added per hop beyond the first.
    pub hop_risk: f64,
    /// Risk added per unit of summed fee fraction.
    pub fee_risk_factor: f64,
    /// Gas amount at which gas efficiency is 0.5.
    pub reference_gas: f64,
    /// Execution time at which speed efficiency is 0.5.
    pub reference_time_ms: f64,
    pub hop_latency_ms: u64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            baselines: FamilyBaselines::default(),
            hop_reliability_penalty: 0.1,
            hop_risk: 0.1,
            fee_risk_factor: 10.0,
            reference_gas: 150_000.0,
            reference_time_ms: 1_000.0,
            hop_latency_ms: 250,
        }
    }
}

impl ScoringPolicy {
    pub fn gas_efficiency(&self, gas: u64) -> f64 {
        self.reference_gas / (self.reference_gas + gas as f64)
    }

    pub fn speed_efficiency(&self, time_ms: u64) -> f64 {
        self.reference_time_ms / (self.reference_time_ms + time_ms as f64)
    }
}

/// `0.4·profitability·(1−risk) + 0.3·reliability + 0.2·gas + 0.1·speed`.
/// Risk above 1.0 zeroes the profitability term.
pub fn combined_score(
    profitability: f64,
    reliability: f64,
    risk_score: f64,
    gas_efficiency: f64,
    speed_efficiency: f64,
) -> f64 {
    0.4 * profitability * (1.0 - risk_score.clamp(0.0, 1.0))
        + 0.3 * reliability
        + 0.2 * gas_efficiency
        + 0.1 * speed_efficiency
}

impl Route {
    /// Assemble and score a route from a chain of successful leg quotes.
    /// `gas_price` converts gas units into output-token units.
    pub fn from_quotes(quotes: &[Quote], gas_price: f64, policy: &ScoringPolicy) -> Option<Route> {
        let first = quotes.first()?;
        let last = quotes.last()?;
        let hops: Vec<Hop> = quotes.iter().map(Hop::from).collect();

        let hop_count = hops.len();
        let extra_hops = (hop_count - 1) as f64;
        let gas_estimate: u64 = hops.iter().map(|h| h.gas_estimate).sum();
        let price_impact = hops.iter().map(|h| h.price_impact).sum::<f64>().min(1.0);
        let execution_time_estimate_ms = policy.hop_latency_ms * hop_count as u64;

        let amount_out = last.amount_out;
        let gas_cost = gas_estimate as f64 * gas_price.max(0.0);
        let profitability = if amount_out > 0.0 {
            ((amount_out - gas_cost) / amount_out).max(0.0)
        } else {
            0.0
        };

        let baseline = hops
            .iter()
            .map(|h| policy.baselines.for_family(h.family))
            .fold(1.0f64, f64::min);
        let reliability =
            (baseline - policy.hop_reliability_penalty * extra_hops).clamp(0.0, 1.0);

        let total_fee: f64 = hops.iter().filter_map(|h| h.fee).map(fee_fraction).sum();
        let risk_score = (policy.hop_risk * extra_hops + policy.fee_risk_factor * total_fee).max(0.0);

        let combined = combined_score(
            profitability,
            reliability,
            risk_score,
            policy.gas_efficiency(gas_estimate),
            policy.speed_efficiency(execution_time_estimate_ms),
        );

        Some(Route {
            id: route_id(&hops),
            amount_in: first.amount_in,
            expected_amount_out: amount_out,
            price_impact,
            gas_estimate,
            execution_time_estimate_ms,
            reliability,
            profitability,
            risk_score,
            combined_score: combined,
            hops,
        })
    }

    pub fn token_in(&self) -> Option<&str> {
        self.hops.first().map(|h| h.token_in.as_str())
    }

    pub fn token_out(&self) -> Option<&str> {
        self.hops.last().map(|h| h.token_out.as_str())
    }

    /// Starts and ends on the same token.
    pub fn is_closed(&self) -> bool {
        matches!((self.token_in(), self.token_out()), (Some(a), Some(b)) if a == b)
    }

    pub fn metric(&self, rank_by: RankBy, policy: &ScoringPolicy) -> f64 {
        match rank_by {
            RankBy::CombinedScore => self.combined_score,
            RankBy::AmountOut => self.expected_amount_out,
            RankBy::Profitability => self.profitability,
            RankBy::Reliability => self.reliability,
            RankBy::GasEfficiency => policy.gas_efficiency(self.gas_estimate),
        }
    }

    /// Join two routes end-to-start into one closed path. Scores are carried
    /// from the weaker leg; callers re-rank by profit.
    pub fn chain(&self, next: &Route) -> Route {
        let mut hops = self.hops.clone();
        hops.extend(next.hops.iter().cloned());
        Route {
            id: route_id(&hops),
            amount_in: self.amount_in,
            expected_amount_out: next.expected_amount_out,
            price_impact: (self.price_impact + next.price_impact).min(1.0),
            gas_estimate: self.gas_estimate + next.gas_estimate,
            execution_time_estimate_ms: self.execution_time_estimate_ms
                + next.execution_time_estimate_ms,
            reliability: self.reliability.min(next.reliability),
            profitability: self.profitability.min(next.profitability),
            risk_score: self.risk_score + next.risk_score,
            combined_score: self.combined_score.min(next.combined_score),
            hops,
        }
    }
}

pub fn route_id(hops: &[Hop]) -> String {
    let fees: Vec<String> = hops
        .iter()
        .map(|h| h.fee.map(|f| f.to_string()).unwrap_or_default())
        .collect();
    let mut parts: Vec<&str> = Vec::with_capacity(hops.len() * 5);
    for (hop, fee) in hops.iter().zip(&fees) {
        parts.extend([
            hop.venue.as_str(),
            hop.pool_ref.as_str(),
            hop.token_in.as_str(),
            hop.token_out.as_str(),
            fee.as_str(),
        ]);
    }
    content_hash(&parts)
}

/// Metric a caller ranks optimizer results by (descending).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankBy {
    #[default]
    CombinedScore,
    AmountOut,
    Profitability,
    Reliability,
    GasEfficiency,
}

impl FromStr for RankBy {
    type Err = AggrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "combined" | "combined_score" | "score" => Ok(RankBy::CombinedScore),
            "amount_out" | "output" => Ok(RankBy::AmountOut),
            "profitability" => Ok(RankBy::Profitability),
            "reliability" => Ok(RankBy::Reliability),
            "gas" | "gas_efficiency" => Ok(RankBy::GasEfficiency),
            other => Err(AggrError::UnknownStrategy(other.to_string())),
        }
    }
}

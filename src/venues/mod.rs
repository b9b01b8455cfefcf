// Venue adapter module
// This file defines the venue configuration model, the Quote type and the
// closed VenueAdapter interface implemented once per pricing family
//
// Numan Thabit 2025 Nov

pub mod amm;
pub mod concentrated;
pub mod weighted;

use crate::errors::VenueError;
use crate::transport::Ledger;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use amm::ConstantProductAdapter;
pub use concentrated::ConcentratedAdapter;
pub use weighted::WeightedAdapter;

/// Fees are expressed in hundredths of a basis point (3000 = 0.30%).
pub const FEE_DENOMINATOR: f64 = 1_000_000.0;

pub fn fee_fraction(fee: u32) -> f64 {
    f64::from(fee) / FEE_DENOMINATOR
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingFamily {
    ConstantProduct,
    Concentrated,
    Weighted,
    Stable,
}

impl PricingFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingFamily::ConstantProduct => "constant_product",
            PricingFamily::Concentrated => "concentrated",
            PricingFamily::Weighted => "weighted",
            PricingFamily::Stable => "stable",
        }
    }
}

/// One entry of a venue's static pool directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool_ref: String,
    pub token_a: String,
    pub token_b: String,
    pub fee: u32,
    /// Normalized weights of (token_a, token_b) for weighted pools.
    #[serde(default)]
    pub weights: Option<(f64, f64)>,
    /// Amplification coefficient for stable pools.
    #[serde(default)]
    pub amplification: Option<f64>,
}

impl PoolConfig {
    pub fn connects(&self, token_in: &str, token_out: &str) -> bool {
        (self.token_a == token_in && self.token_b == token_out)
            || (self.token_b == token_in && self.token_a == token_out)
    }

    /// True when swapping token_a for token_b (the pool's price direction).
    pub fn is_forward(&self, token_in: &str) -> bool {
        self.token_a == token_in
    }
}

/// Immutable venue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: String,
    pub family: PricingFamily,
    #[serde(default)]
    pub fee_tiers: Vec<u32>,
    pub gas_estimate_base: u64,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
}

impl Venue {
    /// Direct-pair lookup. With `fee` set only the pool of that tier matches.
    pub fn find_pool(&self, token_in: &str, token_out: &str, fee: Option<u32>) -> Option<&PoolConfig> {
        self.pools
            .iter()
            .filter(|p| p.connects(token_in, token_out))
            .find(|p| fee.map_or(true, |f| p.fee == f))
    }

    pub fn no_pool(&self, token_in: &str, token_out: &str) -> VenueError {
        VenueError::NoPool {
            venue: self.id.clone(),
            token_in: token_in.to_string(),
            token_out: token_out.to_string(),
        }
    }

    /// Fee tiers a quote pass should query. Families without tiers are
    /// queried once with no tier.
    pub fn quote_tiers(&self) -> Vec<Option<u32>> {
        if self.family == PricingFamily::Concentrated && !self.fee_tiers.is_empty() {
            self.fee_tiers.iter().copied().map(Some).collect()
        } else {
            vec![None]
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub venue: String,
    pub family: PricingFamily,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: f64,
    pub amount_out: f64,
    /// Fraction in [0, 1].
    pub price_impact: f64,
    pub gas_estimate: u64,
    pub pool_ref: String,
    pub fee: Option<u32>,
}

/// Read-only quoting interface, one implementation per pricing family.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn venue(&self) -> &Venue;

    async fn quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
        fee_tier: Option<u32>,
    ) -> Result<Quote, VenueError>;
}

/// Build the adapter matching a venue's pricing family.
pub fn build_adapter(venue: Venue, ledger: Arc<dyn Ledger>) -> Arc<dyn VenueAdapter> {
    match venue.family {
        PricingFamily::ConstantProduct => Arc::new(ConstantProductAdapter::new(venue, ledger)),
        PricingFamily::Concentrated => Arc::new(ConcentratedAdapter::new(venue, ledger)),
        PricingFamily::Weighted | PricingFamily::Stable => {
            Arc::new(WeightedAdapter::new(venue, ledger))
        }
    }
}

pub(crate) fn check_amount(amount_in: f64) -> Result<(), VenueError> {
    if amount_in.is_finite() && amount_in > 0.0 {
        Ok(())
    } else {
        Err(VenueError::InvalidAmount(amount_in))
    }
}

/// Virtual reserves oriented for a swap direction: `(reserve_in, reserve_out)`.
pub(crate) fn oriented_reserves(
    pool: &PoolConfig,
    state: &crate::transport::PoolState,
    token_in: &str,
) -> (f64, f64) {
    let (x, y) = state.virtual_reserves();
    if pool.is_forward(token_in) {
        (x, y)
    } else {
        (y, x)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn venue() -> Venue {
        Venue {
            id: "uni".into(),
            family: PricingFamily::Concentrated,
            fee_tiers: vec![500, 3000],
            gas_estimate_base: 120_000,
            pools: vec![
                PoolConfig {
                    pool_ref: "weth-usdc-500".into(),
                    token_a: "WETH".into(),
                    token_b: "USDC".into(),
                    fee: 500,
                    weights: None,
                    amplification: None,
                },
                PoolConfig {
                    pool_ref: "weth-usdc-3000".into(),
                    token_a: "WETH".into(),
                    token_b: "USDC".into(),
                    fee: 3000,
                    weights: None,
                    amplification: None,
                },
            ],
        }
    }

    #[test]
    fn find_pool_matches_either_direction_and_tier() {
        let v = venue();
        assert_eq!(v.find_pool("USDC", "WETH", Some(3000)).unwrap().pool_ref, "weth-usdc-3000");
        assert_eq!(v.find_pool("WETH", "USDC", None).unwrap().pool_ref, "weth-usdc-500");
        assert!(v.find_pool("WETH", "USDC", Some(10_000)).is_none());
        assert!(v.find_pool("WETH", "DAI", None).is_none());
    }

    #[test]
    fn concentrated_venues_quote_every_tier() {
        assert_eq!(venue().quote_tiers(), vec![Some(500), Some(3000)]);
        let mut cp = venue();
        cp.family = PricingFamily::ConstantProduct;
        assert_eq!(cp.quote_tiers(), vec![None]);
    }
}

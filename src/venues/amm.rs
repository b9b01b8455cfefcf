// AMM venue adapter module
// This file implements the constant-product (x*y=k) adapter: direct-pair
// lookup against the venue's pool directory and the standard swap formula
//
// Numan Thabit 2025 Nov

use super::{check_amount, fee_fraction, oriented_reserves, Quote, Venue, VenueAdapter};
use crate::errors::VenueError;
use crate::transport::Ledger;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Output and price impact of a constant-product swap.
pub fn constant_product_out(amount_in: f64, reserve_in: f64, reserve_out: f64, fee: f64) -> (f64, f64) {
    let effective_in = amount_in * (1.0 - fee);
    let denominator = reserve_in + effective_in;
    if denominator <= 0.0 {
        return (0.0, 1.0);
    }
    let out = effective_in * reserve_out / denominator;
    let impact = (effective_in / denominator).clamp(0.0, 1.0);
    (out, impact)
}

pub struct ConstantProductAdapter {
    venue: Venue,
    ledger: Arc<dyn Ledger>,
}

impl ConstantProductAdapter {
    pub fn new(venue: Venue, ledger: Arc<dyn Ledger>) -> Self {
        Self { venue, ledger }
    }
}

#[async_trait]
impl VenueAdapter for ConstantProductAdapter {
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
        check_amount(amount_in)?;
        let pool = self
            .venue
            .find_pool(token_in, token_out, fee_tier)
            .ok_or_else(|| self.venue.no_pool(token_in, token_out))?;

        let state = self
            .ledger
            .get_pool_state(&self.venue.id, &pool.pool_ref)
            .await
            .map_err(|e| VenueError::Ledger {
                venue: self.venue.id.clone(),
                message: e.to_string(),
            })?;
        if state.liquidity <= 0.0 || state.price <= 0.0 {
            return Err(VenueError::InsufficientLiquidity {
                venue: self.venue.id.clone(),
                pool_ref: pool.pool_ref.clone(),
            });
        }

        let (reserve_in, reserve_out) = oriented_reserves(pool, &state, token_in);
        let (amount_out, price_impact) =
            constant_product_out(amount_in, reserve_in, reserve_out, fee_fraction(pool.fee));

        debug!(
            venue = %self.venue.id,
            pool = %pool.pool_ref,
            amount_in,
            amount_out,
            price_impact,
            "constant-product quote"
        );

        Ok(Quote {
            venue: self.venue.id.clone(),
            family: self.venue.family,
            token_in: token_in.to_string(),
            token_out: token_out.to_string(),
            amount_in,
            amount_out,
            price_impact,
            gas_estimate: self.venue.gas_estimate_base,
            pool_ref: pool.pool_ref.clone(),
            fee: Some(pool.fee),
        })
    }
}

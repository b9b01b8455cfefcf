// Weighted and stable pool adapter
// Bonding-curve approximations for balancer-style weighted pools and
// amplified stable pools
//
// Numan Thabit 2025 Nov

use super::amm::constant_product_out;
use super::{check_amount, fee_fraction, oriented_reserves, PoolConfig, PricingFamily, Quote, Venue, VenueAdapter};
use crate::errors::VenueError;
use crate::transport::{Ledger, PoolState};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_AMPLIFICATION: f64 = 100.0;

/// Weighted-product output: `B_out * (1 - (B_in / (B_in + in')) ^ (w_in / w_out))`.
pub fn weighted_out(
    amount_in: f64,
    balance_in: f64,
    balance_out: f64,
    weight_in: f64,
    weight_out: f64,
    fee: f64,
) -> f64 {
    let effective_in = amount_in * (1.0 - fee);
    let base = balance_in / (balance_in + effective_in);
    balance_out * (1.0 - base.powf(weight_in / weight_out))
}

/// Stable-swap approximation: the constant-product shortfall against the
/// pegged price is divided by the amplification coefficient.
pub fn stable_out(amount_in: f64, reserve_in: f64, reserve_out: f64, fee: f64, amplification: f64) -> f64 {
    let ideal = amount_in * (1.0 - fee) * reserve_out / reserve_in;
    let (cp_out, _) = constant_product_out(amount_in, reserve_in, reserve_out, fee);
    ideal - (ideal - cp_out) / amplification.max(1.0)
}

pub struct WeightedAdapter {
    venue: Venue,
    ledger: Arc<dyn Ledger>,
}

impl WeightedAdapter {
    pub fn new(venue: Venue, ledger: Arc<dyn Ledger>) -> Self {
        Self { venue, ledger }
    }

    /// Returns `(amount_out, price_impact)`.
    fn price(&self, pool: &PoolConfig, state: &PoolState, token_in: &str, amount_in: f64) -> (f64, f64) {
        let fee = fee_fraction(pool.fee);
        let (reserve_in, reserve_out) = oriented_reserves(pool, state, token_in);
        let spot = reserve_out / reserve_in;
        let ideal = amount_in * (1.0 - fee) * spot;

        let amount_out = match self.venue.family {
            PricingFamily::Stable => stable_out(
                amount_in,
                reserve_in,
                reserve_out,
                fee,
                pool.amplification.unwrap_or(DEFAULT_AMPLIFICATION),
            ),
            _ => {
                let (w_a, w_b) = pool.weights.unwrap_or((0.5, 0.5));
                let (w_in, w_out) = if pool.is_forward(token_in) {
                    (w_a, w_b)
                } else {
                    (w_b, w_a)
                };
                // Scale virtual reserves so the weighted spot price equals
                // the reported pool price.
                weighted_out(
                    amount_in,
                    reserve_in * 2.0 * w_in,
                    reserve_out * 2.0 * w_out,
                    w_in,
                    w_out,
                    fee,
                )
            }
        };

        let impact = if ideal > 0.0 {
            (1.0 - amount_out / ideal).clamp(0.0, 1.0)
        } else {
            1.0
        };
        (amount_out, impact)
    }
}

#[async_trait]
impl VenueAdapter for WeightedAdapter {
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

        let (amount_out, price_impact) = self.price(pool, &state, token_in, amount_in);
        debug!(
            venue = %self.venue.id,
            family = self.venue.family.as_str(),
            pool = %pool.pool_ref,
            amount_out,
            price_impact,
            "curve quote"
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

// Concentrated-liquidity venue integration module
// This file implements the adapter for tick-based pools: each fee tier is a
// separate pool, priced through the ledger's quoter
//
// Numan Thabit 2025 Nov

use super::{check_amount, oriented_reserves, Quote, Venue, VenueAdapter};
use crate::errors::VenueError;
use crate::transport::Ledger;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Concentrated-liquidity adapter.
pub struct ConcentratedAdapter {
    venue: Venue,
    ledger: Arc<dyn Ledger>,
}

impl ConcentratedAdapter {
    pub fn new(venue: Venue, ledger: Arc<dyn Ledger>) -> Self {
        Self { venue, ledger }
    }

    fn ledger_err(&self, e: impl std::fmt::Display) -> VenueError {
        VenueError::Ledger {
            venue: self.venue.id.clone(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl VenueAdapter for ConcentratedAdapter {
    fn venue(&self) -> &Venue {
        &self.venue
    }

    /// Quote one fee tier. Without a tier the cheapest configured pool for
    /// the pair is used.
    async fn quote(
        &self,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
        fee_tier: Option<u32>,
    ) -> Result<Quote, VenueError> {
        check_amount(amount_in)?;
        let pool = match fee_tier {
            Some(fee) => self.venue.find_pool(token_in, token_out, Some(fee)),
            None => self
                .venue
                .pools
                .iter()
                .filter(|p| p.connects(token_in, token_out))
                .min_by_key(|p| p.fee),
        }
        .ok_or_else(|| self.venue.no_pool(token_in, token_out))?;

        let state = self
            .ledger
            .get_pool_state(&self.venue.id, &pool.pool_ref)
            .await
            .map_err(|e| self.ledger_err(e))?;
        if state.liquidity <= 0.0 || state.price <= 0.0 {
            return Err(VenueError::InsufficientLiquidity {
                venue: self.venue.id.clone(),
                pool_ref: pool.pool_ref.clone(),
            });
        }

        let amount_out = self
            .ledger
            .get_quote(&self.venue.id, token_in, token_out, amount_in, Some(pool.fee))
            .await
            .map_err(|e| self.ledger_err(e))?;
        if !(amount_out.is_finite() && amount_out > 0.0) {
            return Err(VenueError::InsufficientLiquidity {
                venue: self.venue.id.clone(),
                pool_ref: pool.pool_ref.clone(),
            });
        }

        // Only in-range liquidity absorbs the trade.
        let (reserve_in, _) = oriented_reserves(pool, &state, token_in);
        let price_impact = (amount_in / (reserve_in + amount_in)).clamp(0.0, 1.0);

        debug!(
            venue = %self.venue.id,
            pool = %pool.pool_ref,
            fee = pool.fee,
            amount_out,
            price_impact,
            "concentrated quote"
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

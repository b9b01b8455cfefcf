// Ledger interface
// Read-only view of the settlement chain used for quoting and inclusion checks
//
// Numan Thabit 2025 Nov

use crate::errors::AggrError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Pool state as reported by the ledger.
///
/// `price` is expressed as token_b per token_a of the pool's configured
/// ordering. `liquidity` is the geometric (virtual) liquidity `sqrt(x * y)`;
/// for concentrated pools it is the in-range liquidity only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub liquidity: f64,
    pub price: f64,
    pub tick_spacing: Option<i32>,
}

impl PoolState {
    /// Virtual reserves `(x, y)` of token_a and token_b.
    pub fn virtual_reserves(&self) -> (f64, f64) {
        let sqrt_p = self.price.sqrt();
        (self.liquidity / sqrt_p, self.liquidity * sqrt_p)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub number: u64,
    /// Transaction hashes included in the block.
    pub transactions: Vec<String>,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// On-chain quoter: amount out for `amount_in` through the venue's pool.
    async fn get_quote(
        &self,
        venue: &str,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
        fee_tier: Option<u32>,
    ) -> Result<f64, AggrError>;

    async fn get_pool_state(&self, venue: &str, pool_ref: &str) -> Result<PoolState, AggrError>;

    async fn get_block(&self, number: u64) -> Result<Block, AggrError>;

    async fn get_current_block(&self) -> Result<u64, AggrError>;
}

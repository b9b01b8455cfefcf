// Bundle construction module
// Turns a chosen route into an ordered, atomic operation list with
// strategy-derived fee parameters, and owns the bundle status machine
//
// Numan Thabit 2025 Nov

use crate::errors::AggrError;
use crate::router::routes::{content_hash, Route};
use crate::router::validation::validate_route;
use crate::transport::{BundlePayload, ResolvedOperation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Extra gas allowed per operation over the hop estimate, in percent.
const GAS_HEADROOM_PCT: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleStrategy {
    Aggressive,
    Standard,
    Conservative,
}

impl BundleStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleStrategy::Aggressive => "aggressive",
            BundleStrategy::Standard => "standard",
            BundleStrategy::Conservative => "conservative",
        }
    }

    /// `(priority multiplier, max fee multiplier)`.
    pub fn multipliers(&self) -> (f64, f64) {
        match self {
            BundleStrategy::Conservative => (0.5, 2.0),
            BundleStrategy::Standard => (1.0, 3.0),
            BundleStrategy::Aggressive => (3.0, 5.0),
        }
    }
}

impl FromStr for BundleStrategy {
    type Err = AggrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aggressive" => Ok(BundleStrategy::Aggressive),
            "standard" => Ok(BundleStrategy::Standard),
            "conservative" => Ok(BundleStrategy::Conservative),
            other => Err(AggrError::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeParams {
    pub base_fee_per_gas: u64,
    pub max_priority_fee_per_gas: u64,
    pub max_fee_per_gas: u64,
}

/// Input amount of an operation. Later legs consume whatever the previous
/// leg produced; the figure is only fixed when the payload is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LegAmount {
    Exact(f64),
    PreviousOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub index: usize,
    pub venue: String,
    pub pool_ref: String,
    pub token_in: String,
    pub token_out: String,
    pub fee: Option<u32>,
    pub amount: LegAmount,
    /// Output rate observed at quote time, out per unit in.
    pub quoted_rate: f64,
    pub gas_limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
    Pending,
    Submitted,
    Included,
    Failed,
    Expired,
}

impl BundleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleStatus::Pending => "pending",
            BundleStatus::Submitted => "submitted",
            BundleStatus::Included => "included",
            BundleStatus::Failed => "failed",
            BundleStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BundleStatus::Included | BundleStatus::Failed | BundleStatus::Expired
        )
    }

    /// Transitions are forward-only; terminal states never change.
    pub fn can_transition_to(&self, next: BundleStatus) -> bool {
        use BundleStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Submitted, Included)
                | (Submitted, Failed)
                | (Submitted, Expired)
        )
    }
}

impl fmt::Display for BundleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: String,
    pub route_id: String,
    pub strategy: BundleStrategy,
    pub operations: Vec<Operation>,
    pub target_block: u64,
    pub max_block_number: u64,
    pub fee_params: FeeParams,
    pub expected_profit: f64,
    pub gas_limit: u64,
    pub status: BundleStatus,
}

impl Bundle {
    pub fn transition(&mut self, next: BundleStatus) -> Result<(), AggrError> {
        if !self.status.can_transition_to(next) {
            return Err(AggrError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn is_expired_at(&self, current_block: u64) -> bool {
        current_block > self.max_block_number
    }

    pub fn with_expected_profit(mut self, expected_profit: f64) -> Self {
        self.expected_profit = expected_profit;
        self
    }

    /// Resolve amounts, minimum outputs and deadlines against the chain head.
    pub fn payload(&self, current_block: u64, slippage_bps: u32) -> BundlePayload {
        let keep = 1.0 - f64::from(slippage_bps.min(10_000)) / 10_000.0;
        let mut operations = Vec::with_capacity(self.operations.len());
        let mut carried = 0.0;
        for op in &self.operations {
            let amount_in = match op.amount {
                LegAmount::Exact(amount) => amount,
                LegAmount::PreviousOutput => carried,
            };
            let min_amount_out = amount_in * op.quoted_rate * keep;
            carried = min_amount_out;
            operations.push(ResolvedOperation {
                index: op.index,
                venue: op.venue.clone(),
                pool_ref: op.pool_ref.clone(),
                token_in: op.token_in.clone(),
                token_out: op.token_out.clone(),
                fee: op.fee,
                amount_in,
                min_amount_out,
                gas_limit: op.gas_limit,
                deadline_block: self.max_block_number,
            });
        }

        BundlePayload {
            bundle_id: self.id.clone(),
            operations,
            target_block: (current_block + 1).clamp(self.target_block, self.max_block_number),
            max_block_number: self.max_block_number,
            max_priority_fee_per_gas: self.fee_params.max_priority_fee_per_gas,
            max_fee_per_gas: self.fee_params.max_fee_per_gas,
        }
    }
}

/// Pure bundle factory; no network access.
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    base_fee: u64,
    priority_fee: u64,
    block_window: u64,
    max_operations: usize,
}

impl BundleBuilder {
    pub fn new(base_fee: u64, priority_fee: u64, block_window: u64) -> Self {
        Self {
            base_fee,
            priority_fee,
            block_window,
            max_operations: 8,
        }
    }

    pub fn with_max_operations(mut self, max_operations: usize) -> Self {
        self.max_operations = max_operations.max(1);
        self
    }

    pub fn fee_params(&self, strategy: BundleStrategy) -> FeeParams {
        let (priority_mult, max_mult) = strategy.multipliers();
        let priority = (self.priority_fee as f64 * priority_mult).round() as u64;
        FeeParams {
            base_fee_per_gas: self.base_fee,
            max_priority_fee_per_gas: priority,
            max_fee_per_gas: (self.base_fee as f64 * max_mult).round() as u64 + priority,
        }
    }

    pub fn build(&self, route: &Route, strategy: BundleStrategy, current_block: u64) -> Result<Bundle, AggrError> {
        validate_route(route, None, self.max_operations - 1).into_result()?;

        let operations: Vec<Operation> = route
            .hops
            .iter()
            .enumerate()
            .map(|(index, hop)| Operation {
                index,
                venue: hop.venue.clone(),
                pool_ref: hop.pool_ref.clone(),
                token_in: hop.token_in.clone(),
                token_out: hop.token_out.clone(),
                fee: hop.fee,
                amount: if index == 0 {
                    LegAmount::Exact(route.amount_in)
                } else {
                    LegAmount::PreviousOutput
                },
                quoted_rate: if hop.amount_in > 0.0 {
                    hop.amount_out / hop.amount_in
                } else {
                    0.0
                },
                gas_limit: hop.gas_estimate + hop.gas_estimate * GAS_HEADROOM_PCT / 100,
            })
            .collect();

        let target_block = current_block + 1;
        let expected_profit = if route.is_closed() {
            route.expected_amount_out - route.amount_in
        } else {
            0.0
        };

        Ok(Bundle {
            id: content_hash(&[&route.id, strategy.as_str(), &target_block.to_string()]),
            route_id: route.id.clone(),
            strategy,
            gas_limit: operations.iter().map(|o| o.gas_limit).sum(),
            operations,
            target_block,
            max_block_number: target_block + self.block_window,
            fee_params: self.fee_params(strategy),
            expected_profit,
            status: BundleStatus::Pending,
        })
    }
}

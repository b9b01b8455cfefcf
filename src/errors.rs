// Error types and error handling module
// This file defines the error taxonomy shared by venue adapters, relay clients
// and the aggregator core
//
// Numan Thabit 2025 Nov

use thiserror::Error;

/// Hard failures: contract violations, bad config, transport breakage at the
/// edges. Business-level failures (expired bundles, exhausted relays) are
/// reported through result objects instead.
#[derive(Debug, Error)]
pub enum AggrError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
    #[error("invalid bundle transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::router::bundle::BundleStatus,
        to: crate::router::bundle::BundleStatus,
    },
    #[error("unknown bundle: {0}")]
    UnknownBundle(String),
}

/// A venue could not produce a quote. Always scoped to one venue and one
/// optimization pass.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VenueError {
    #[error("{venue}: no pool for {token_in}/{token_out}")]
    NoPool {
        venue: String,
        token_in: String,
        token_out: String,
    },
    #[error("{venue}: quote timed out after {timeout_ms}ms")]
    Timeout { venue: String, timeout_ms: u64 },
    #[error("{venue}: ledger error: {message}")]
    Ledger { venue: String, message: String },
    #[error("{venue}: insufficient liquidity in {pool_ref}")]
    InsufficientLiquidity { venue: String, pool_ref: String },
    #[error("invalid amount {0}")]
    InvalidAmount(f64),
}

impl VenueError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            VenueError::NoPool { .. } => "no_pool",
            VenueError::Timeout { .. } => "timeout",
            VenueError::Ledger { .. } => "ledger",
            VenueError::InsufficientLiquidity { .. } => "liquidity",
            VenueError::InvalidAmount(_) => "amount",
        }
    }
}

/// A single relay refused or failed a submission. Triggers failover.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RelayError {
    #[error("relay {relay} rejected bundle: {reason}")]
    Rejected { relay: String, reason: String },
    #[error("relay {relay} timed out after {timeout_ms}ms")]
    Timeout { relay: String, timeout_ms: u64 },
    #[error("relay {relay} transport error: {message}")]
    Transport { relay: String, message: String },
}

// Router module - route discovery and bundling plane
// This file wires the optimizer, arbitrage detector and bundle builder
// together behind the Router pipeline and its HTTP API
//
// Numan Thabit 2025 Nov

pub mod arbitrage;
pub mod bundle;
pub mod optimizer;
pub mod routes;
pub mod validation;

#[allow(clippy::module_inception)]
pub mod router;

pub use arbitrage::{ArbitrageDetector, Opportunity, OpportunityKind};
pub use bundle::{Bundle, BundleBuilder, BundleStatus, BundleStrategy};
pub use optimizer::{RouteOptimizer, RouteQuery};
pub use router::{CycleReport, CycleSettings, Router};
pub use routes::{Hop, RankBy, Route, ScoringPolicy};

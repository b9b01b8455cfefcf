// Library root module for relay-aggr
// This file defines the public API and module structure: venue quoting,
// route optimization, bundle construction and relay submission
//
// Numan Thabit 2025 Nov

pub mod config;
pub mod control;
pub mod errors;
pub mod metrics;
pub mod relay;
pub mod router;
pub mod transport;
pub mod venues;

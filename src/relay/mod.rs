// Relay module - submission plane
// Relay performance tracking, scored selection with bounded failover, and
// the inclusion monitor that closes the feedback loop
//
// Numan Thabit 2025 Nov

pub mod aggregator;
pub mod monitor;
pub mod performance;

pub use aggregator::{
    InclusionProbe, RelayAggregator, RelayPolicy, SubmissionAttempt, SubmissionFailure,
    SubmissionOutcome,
};
pub use monitor::{InclusionMonitor, SweepReport};
pub use performance::{HealthPolicy, HealthUpdate, RelayPerformance, SelectionStrategy};

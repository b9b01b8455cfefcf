// Metrics and observability module
// This file holds the Prometheus series for upstream calls and relay activity,
// and the MetricsCollector that aggregates bundle outcomes for the dashboard
//
// Numan Thabit 2025 Nov

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

pub static REQ_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "aggr_request_latency_seconds",
        "latency for upstream calls",
        &["service", "method"]
    )
    .expect("register aggr_request_latency_seconds")
});

pub static REQ_ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aggr_request_errors_total",
        "errors by upstream",
        &["service", "method"]
    )
    .expect("register aggr_request_errors_total")
});

pub static QUOTE_FAILURES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aggr_quote_failures_total",
        "venue quotes that produced no result",
        &["venue", "kind"]
    )
    .expect("register aggr_quote_failures_total")
});

pub static RELAY_SUBMISSIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aggr_relay_submissions_total",
        "bundle submission attempts by relay and outcome",
        &["relay", "outcome"]
    )
    .expect("register aggr_relay_submissions_total")
});

pub static RELAY_SCORE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "aggr_relay_score",
        "latest batch-computed relay score (0-10000)",
        &["relay"]
    )
    .expect("register aggr_relay_score")
});

pub static BUNDLE_STATUS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "aggr_bundle_status_total",
        "bundle status transitions",
        &["status"]
    )
    .expect("register aggr_bundle_status_total")
});

/// Dashboard view returned by `getMetrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_bundles: u64,
    pub successful_bundles: u64,
    pub failed_bundles: u64,
    pub expired_bundles: u64,
    pub average_profit: f64,
    pub total_gas_used: u64,
    /// Profit-weighted inclusion rate: realized expected profit over the
    /// expected profit of every submitted bundle.
    pub profitability_score: f64,
}

#[derive(Debug, Default)]
struct Totals {
    total_bundles: u64,
    successful_bundles: u64,
    failed_bundles: u64,
    expired_bundles: u64,
    submitted_profit: f64,
    realized_profit: f64,
    total_gas_used: u64,
    relay_scores: HashMap<String, u32>,
}

/// Aggregates bundle outcomes. Fed by the aggregator (submissions, failures)
/// and the inclusion monitor (inclusions, expiries).
#[derive(Debug, Default)]
pub struct MetricsCollector {
    totals: Mutex<Totals>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_totals<R>(&self, f: impl FnOnce(&mut Totals) -> R) -> R {
        let mut guard = self.totals.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// A bundle entered the system with its expected profit.
    pub fn record_bundle(&self, expected_profit: f64) {
        self.with_totals(|t| {
            t.total_bundles += 1;
            t.submitted_profit += expected_profit.max(0.0);
        });
    }

    pub fn record_included(&self, expected_profit: f64, gas_used: u64) {
        BUNDLE_STATUS.with_label_values(&["included"]).inc();
        self.with_totals(|t| {
            t.successful_bundles += 1;
            t.realized_profit += expected_profit.max(0.0);
            t.total_gas_used += gas_used;
        });
    }

    pub fn record_failed(&self) {
        BUNDLE_STATUS.with_label_values(&["failed"]).inc();
        self.with_totals(|t| t.failed_bundles += 1);
    }

    pub fn record_expired(&self) {
        BUNDLE_STATUS.with_label_values(&["expired"]).inc();
        self.with_totals(|t| t.expired_bundles += 1);
    }

    pub fn record_relay_scores(&self, scores: &[(String, u32)]) {
        for (relay, score) in scores {
            RELAY_SCORE
                .with_label_values(&[relay.as_str()])
                .set(f64::from(*score));
        }
        self.with_totals(|t| {
            t.relay_scores = scores.iter().cloned().collect();
        });
    }

    pub fn relay_score(&self, relay_id: &str) -> Option<u32> {
        self.with_totals(|t| t.relay_scores.get(relay_id).copied())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.with_totals(|t| MetricsSnapshot {
            total_bundles: t.total_bundles,
            successful_bundles: t.successful_bundles,
            failed_bundles: t.failed_bundles,
            expired_bundles: t.expired_bundles,
            average_profit: if t.successful_bundles > 0 {
                t.realized_profit / t.successful_bundles as f64
            } else {
                0.0
            },
            total_gas_used: t.total_gas_used,
            profitability_score: if t.submitted_profit > 0.0 {
                (t.realized_profit / t.submitted_profit).clamp(0.0, 1.0)
            } else {
                0.0
            },
        })
    }
}

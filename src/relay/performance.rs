// Relay performance tracking
// Per-relay counters, health rules and the batch score used by selection
//
// Numan Thabit 2025 Nov

use crate::errors::AggrError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Health and scoring thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthPolicy {
    pub min_success_rate: f64,
    /// Submissions before the success rate is enforced.
    pub min_samples: u64,
    pub max_latency_ms: u64,
    pub max_consecutive_failures: u32,
    pub max_queue_length: u32,
    /// Cost at which the cost component is 5000.
    pub reference_cost: f64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            min_success_rate: 0.70,
            min_samples: 10,
            max_latency_ms: 10_000,
            max_consecutive_failures: 5,
            max_queue_length: 100,
            reference_cost: 1.0,
        }
    }
}

/// Push-based health probe for one relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthUpdate {
    pub relay_id: String,
    pub latency_ms: u64,
    pub responsive: bool,
    #[serde(default)]
    pub queue_length: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayPerformance {
    pub relay_id: String,
    pub total_submissions: u64,
    pub successful_inclusions: u64,
    pub total_latency_ms: u64,
    pub total_cost: f64,
    pub consecutive_failures: u32,
    pub active: bool,
    /// Cached batch score in [0, 10000].
    pub score: u32,
    pub last_latency_ms: Option<u64>,
    pub queue_length: Option<u32>,
}

impl RelayPerformance {
    pub fn new(relay_id: impl Into<String>) -> Self {
        Self {
            relay_id: relay_id.into(),
            total_submissions: 0,
            successful_inclusions: 0,
            total_latency_ms: 0,
            total_cost: 0.0,
            consecutive_failures: 0,
            active: true,
            score: 0,
            last_latency_ms: None,
            queue_length: None,
        }
    }

    pub fn success_rate(&self) -> Option<f64> {
        (self.total_submissions > 0)
            .then(|| self.successful_inclusions as f64 / self.total_submissions as f64)
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        if self.total_submissions > 0 {
            Some(self.total_latency_ms as f64 / self.total_submissions as f64)
        } else {
            self.last_latency_ms.map(|l| l as f64)
        }
    }

    pub fn avg_cost(&self) -> Option<f64> {
        (self.total_submissions > 0).then(|| self.total_cost / self.total_submissions as f64)
    }

    pub fn is_healthy(&self, policy: &HealthPolicy) -> bool {
        let success_ok = self.total_submissions < policy.min_samples
            || self
                .success_rate()
                .map_or(true, |rate| rate >= policy.min_success_rate);
        let latency_ok = self
            .last_latency_ms
            .map_or(true, |l| l <= policy.max_latency_ms);
        self.active
            && success_ok
            && latency_ok
            && self.consecutive_failures < policy.max_consecutive_failures
    }

    /// Weighted score in [0, 10000]:
    /// 0.40 success + 0.25 latency + 0.20 cost + 0.15 reliability.
    pub fn compute_score(&self, policy: &HealthPolicy) -> u32 {
        let success = self.success_rate().map_or(5_000.0, |rate| 10_000.0 * rate);
        let latency = 10_000.0 * 1_000.0 / (self.avg_latency_ms().unwrap_or(0.0) + 1_000.0);
        let reference = policy.reference_cost.max(f64::EPSILON);
        let cost = 10_000.0 * reference / (self.avg_cost().unwrap_or(0.0) + reference);
        let reliability = 10_000.0 / f64::from(self.consecutive_failures + 1);

        let score = 0.40 * success + 0.25 * latency + 0.20 * cost + 0.15 * reliability;
        score.round().clamp(0.0, 10_000.0) as u32
    }

    pub fn record_attempt(&mut self, latency_ms: u64, cost: f64, accepted: bool) {
        self.total_submissions += 1;
        self.total_latency_ms += latency_ms;
        self.total_cost += cost.max(0.0);
        self.last_latency_ms = Some(latency_ms);
        if accepted {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    pub fn record_inclusion(&mut self) {
        self.successful_inclusions = (self.successful_inclusions + 1).min(self.total_submissions.max(1));
    }

    pub fn apply_health(&mut self, update: &HealthUpdate, policy: &HealthPolicy) {
        self.last_latency_ms = Some(update.latency_ms);
        self.queue_length = Some(update.queue_length);
        self.active = update.responsive && update.queue_length <= policy.max_queue_length;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    Fastest,
    HighestSuccess,
    LowestCost,
    #[default]
    Balanced,
    RoundRobin,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionStrategy::Fastest => "fastest",
            SelectionStrategy::HighestSuccess => "highest_success",
            SelectionStrategy::LowestCost => "lowest_cost",
            SelectionStrategy::Balanced => "balanced",
            SelectionStrategy::RoundRobin => "round_robin",
        }
    }
}

impl FromStr for SelectionStrategy {
    type Err = AggrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fastest" => Ok(SelectionStrategy::Fastest),
            "highest_success" => Ok(SelectionStrategy::HighestSuccess),
            "lowest_cost" => Ok(SelectionStrategy::LowestCost),
            "balanced" => Ok(SelectionStrategy::Balanced),
            "round_robin" => Ok(SelectionStrategy::RoundRobin),
            other => Err(AggrError::UnknownStrategy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn perf(submissions: u64, inclusions: u64, latency_ms: u64) -> RelayPerformance {
        let mut p = RelayPerformance::new("r");
        for _ in 0..submissions {
            p.record_attempt(latency_ms, 0.0, true);
        }
        p.successful_inclusions = inclusions;
        p
    }

    #[test]
    fn health_rules() {
        let policy = HealthPolicy::default();
        assert!(perf(0, 0, 0).is_healthy(&policy));
        // Below the sample floor the success rate is not enforced.
        assert!(perf(9, 0, 100).is_healthy(&policy));
        assert!(!perf(10, 6, 100).is_healthy(&policy));
        assert!(perf(10, 7, 100).is_healthy(&policy));
        assert!(!perf(1, 1, 10_001).is_healthy(&policy));

        let mut failing = perf(0, 0, 0);
        for _ in 0..5 {
            failing.record_attempt(100, 0.0, false);
        }
        assert!(!failing.is_healthy(&policy));
    }

    #[test]
    fn health_feed_toggles_activity() {
        let policy = HealthPolicy::default();
        let mut p = RelayPerformance::new("r");
        let update = |responsive, queue_length| HealthUpdate {
            relay_id: "r".into(),
            latency_ms: 200,
            responsive,
            queue_length,
        };
        p.apply_health(&update(false, 0), &policy);
        assert!(!p.is_healthy(&policy));
        p.apply_health(&update(true, 500), &policy);
        assert!(!p.is_healthy(&policy));
        p.apply_health(&update(true, 3), &policy);
        assert!(p.is_healthy(&policy));
        assert_eq!(p.last_latency_ms, Some(200));
    }

    #[test]
    fn score_components() {
        let policy = HealthPolicy::default();
        // Neutral success, zero latency, zero cost, no failures.
        assert_eq!(RelayPerformance::new("r").compute_score(&policy), 8_000);
        // 19/20 inclusions at 1000ms average latency.
        let p = perf(20, 19, 1_000);
        assert_eq!(p.compute_score(&policy), 3_800 + 1_250 + 2_000 + 1_500);

        let mut failing = perf(2, 2, 0);
        failing.record_attempt(0, 0.0, false);
        // success 2/3, reliability 10000/2
        let expected = (0.40 * 10_000.0 * 2.0 / 3.0 + 2_500.0 + 2_000.0 + 750.0f64).round() as u32;
        assert_eq!(failing.compute_score(&policy), expected);
    }

    #[test]
    fn strategy_names() {
        assert_eq!("round-robin".parse::<SelectionStrategy>().unwrap(), SelectionStrategy::RoundRobin);
        assert!(matches!(
            "cheapest".parse::<SelectionStrategy>(),
            Err(AggrError::UnknownStrategy(_))
        ));
    }
}

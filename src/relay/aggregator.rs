// Relay aggregator - scored relay selection and bounded failover
// Owns the relay registry, per-relay performance, bundle status transitions
// and the append-only submission audit trail
//
// Numan Thabit 2025 Nov

use crate::errors::{AggrError, RelayError};
use crate::metrics::{MetricsCollector, BUNDLE_STATUS, RELAY_SUBMISSIONS};
use crate::relay::performance::{HealthPolicy, HealthUpdate, RelayPerformance, SelectionStrategy};
use crate::router::bundle::{Bundle, BundleStatus};
use crate::transport::{Ledger, RelayClient, RelayReceipt};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

fn default_max_failover_attempts() -> usize {
    3
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

fn default_slippage_bps() -> u32 {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayPolicy {
    #[serde(default)]
    pub health: HealthPolicy,
    /// Total attempts per failover chain, primary included.
    #[serde(default = "default_max_failover_attempts")]
    pub max_failover_attempts: usize,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            health: HealthPolicy::default(),
            max_failover_attempts: default_max_failover_attempts(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            slippage_bps: default_slippage_bps(),
        }
    }
}

/// Audit record of one submission attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionAttempt {
    pub bundle_id: String,
    pub relay_id: String,
    pub timestamp_ms: u64,
    pub latency_ms: u64,
    pub success: bool,
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionFailure {
    /// Every attempt in the chain was rejected.
    AllRelaysExhausted,
    /// No healthy relay was available for the first attempt.
    NoHealthyRelay,
    /// The bundle's block window had already passed.
    BundleExpired,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionOutcome {
    pub bundle_id: String,
    pub status: BundleStatus,
    pub relay_id: Option<String>,
    pub attempts: usize,
    pub failure: Option<SubmissionFailure>,
}

/// Snapshot of a submitted bundle for the inclusion monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct InclusionProbe {
    pub bundle_id: String,
    pub status: BundleStatus,
    pub evidence: Vec<String>,
    pub next_block: u64,
    pub max_block_number: u64,
}

struct RelaySlot {
    client: Arc<dyn RelayClient>,
    perf: Mutex<RelayPerformance>,
}

impl RelaySlot {
    fn with_perf<R>(&self, f: impl FnOnce(&mut RelayPerformance) -> R) -> R {
        let mut guard = self.perf.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

struct TrackedBundle {
    bundle: Bundle,
    relay_id: Option<String>,
    receipt: Option<RelayReceipt>,
    next_block: u64,
    created_at: Instant,
}

pub struct RelayAggregator {
    relays: RwLock<HashMap<String, Arc<RelaySlot>>>,
    bundles: RwLock<HashMap<String, Arc<tokio::sync::Mutex<TrackedBundle>>>>,
    attempts: Mutex<HashMap<String, Vec<SubmissionAttempt>>>,
    ledger: Arc<dyn Ledger>,
    metrics: Arc<MetricsCollector>,
    policy: RelayPolicy,
    cursor: AtomicUsize,
}

impl RelayAggregator {
    pub fn new(ledger: Arc<dyn Ledger>, metrics: Arc<MetricsCollector>, policy: RelayPolicy) -> Self {
        Self {
            relays: RwLock::new(HashMap::new()),
            bundles: RwLock::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            ledger,
            metrics,
            policy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn policy(&self) -> &RelayPolicy {
        &self.policy
    }

    /// Register a relay. Re-registering an id replaces the client and keeps
    /// its history.
    pub async fn register_relay(&self, client: Arc<dyn RelayClient>) {
        let id = client.id().to_string();
        let mut relays = self.relays.write().await;
        let perf = relays
            .get(&id)
            .map(|slot| slot.with_perf(|p| p.clone()))
            .unwrap_or_else(|| RelayPerformance::new(id.clone()));
        relays.insert(
            id.clone(),
            Arc::new(RelaySlot {
                client,
                perf: Mutex::new(perf),
            }),
        );
        info!(relay = %id, "registered relay");
    }

    /// Seed a relay's history, e.g. from a persisted snapshot.
    pub async fn restore_performance(&self, perf: RelayPerformance) -> bool {
        let relays = self.relays.read().await;
        match relays.get(&perf.relay_id) {
            Some(slot) => {
                slot.with_perf(|p| *p = perf);
                true
            }
            None => false,
        }
    }

    /// Healthy relays ordered best-first for `strategy`, skipping `exclude`.
    async fn ranked(&self, strategy: SelectionStrategy, exclude: &HashSet<String>) -> Vec<Arc<RelaySlot>> {
        let relays = self.relays.read().await;
        let mut healthy: Vec<(RelayPerformance, Arc<RelaySlot>)> = relays
            .values()
            .map(|slot| (slot.with_perf(|p| p.clone()), slot.clone()))
            .filter(|(perf, _)| perf.is_healthy(&self.policy.health))
            .collect();
        drop(relays);
        healthy.sort_by(|a, b| a.0.relay_id.cmp(&b.0.relay_id));

        match strategy {
            SelectionStrategy::RoundRobin => {
                if !healthy.is_empty() {
                    let start = self.cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
                    healthy.rotate_left(start);
                }
            }
            SelectionStrategy::Fastest => healthy.sort_by(|a, b| {
                let key = |p: &RelayPerformance| p.avg_latency_ms().unwrap_or(f64::INFINITY);
                key(&a.0).total_cmp(&key(&b.0))
            }),
            SelectionStrategy::HighestSuccess => healthy.sort_by(|a, b| {
                let key = |p: &RelayPerformance| p.success_rate().unwrap_or(0.5);
                key(&b.0).total_cmp(&key(&a.0))
            }),
            SelectionStrategy::LowestCost => healthy.sort_by(|a, b| {
                let key = |p: &RelayPerformance| p.avg_cost().unwrap_or(f64::INFINITY);
                key(&a.0).total_cmp(&key(&b.0))
            }),
            SelectionStrategy::Balanced => healthy.sort_by(|a, b| b.0.score.cmp(&a.0.score)),
        }

        healthy
            .into_iter()
            .filter(|(perf, _)| !exclude.contains(&perf.relay_id))
            .map(|(_, slot)| slot)
            .collect()
    }

    /// Primary relay for `strategy`. Unhealthy relays are never returned.
    pub async fn select(&self, strategy: SelectionStrategy) -> Option<String> {
        self.ranked(strategy, &HashSet::new())
            .await
            .first()
            .map(|slot| slot.client.id().to_string())
    }

    async fn track(&self, bundle: Bundle) -> Arc<tokio::sync::Mutex<TrackedBundle>> {
        let mut bundles = self.bundles.write().await;
        bundles
            .entry(bundle.id.clone())
            .or_insert_with(|| {
                self.metrics.record_bundle(bundle.expected_profit);
                Arc::new(tokio::sync::Mutex::new(TrackedBundle {
                    next_block: bundle.target_block,
                    bundle,
                    relay_id: None,
                    receipt: None,
                    created_at: Instant::now(),
                }))
            })
            .clone()
    }

    fn append_attempt(&self, attempt: SubmissionAttempt) {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.entry(attempt.bundle_id.clone()).or_default().push(attempt);
    }

    /// Submit through the strategy's primary, failing over to the next best
    /// distinct healthy relay. Business failures are reported in the outcome.
    #[tracing::instrument(skip_all, fields(bundle = %bundle.id, strategy = strategy.as_str()))]
    pub async fn submit_with_failover(
        &self,
        bundle: Bundle,
        strategy: SelectionStrategy,
    ) -> Result<SubmissionOutcome, AggrError> {
        let bundle_id = bundle.id.clone();
        let tracked = self.track(bundle).await;
        let mut entry = tracked.lock().await;
        if entry.bundle.status != BundleStatus::Pending {
            return Err(AggrError::InvalidTransition {
                from: entry.bundle.status,
                to: BundleStatus::Submitted,
            });
        }

        let current_block = match self.ledger.get_current_block().await {
            Ok(block) => block,
            Err(e) => {
                warn!(error = %e, "current block unavailable; assuming bundle is fresh");
                entry.bundle.target_block.saturating_sub(1)
            }
        };
        if entry.bundle.is_expired_at(current_block) {
            entry.bundle.transition(BundleStatus::Expired)?;
            self.metrics.record_expired();
            return Ok(SubmissionOutcome {
                bundle_id,
                status: BundleStatus::Expired,
                relay_id: None,
                attempts: 0,
                failure: Some(SubmissionFailure::BundleExpired),
            });
        }

        let payload = entry.bundle.payload(current_block, self.policy.slippage_bps);
        let attempt_timeout = Duration::from_millis(self.policy.attempt_timeout_ms);
        let mut tried: HashSet<String> = HashSet::new();

        while tried.len() < self.policy.max_failover_attempts {
            let Some(slot) = self.ranked(strategy, &tried).await.into_iter().next() else {
                break;
            };
            let relay_id = slot.client.id().to_string();
            tried.insert(relay_id.clone());

            let start = Instant::now();
            let result = match tokio::time::timeout(attempt_timeout, slot.client.submit_bundle(&payload)).await {
                Ok(r) => r,
                Err(_) => Err(RelayError::Timeout {
                    relay: relay_id.clone(),
                    timeout_ms: self.policy.attempt_timeout_ms,
                }),
            };
            let latency_ms = start.elapsed().as_millis() as u64;

            let accepted = result.is_ok();
            let cost = result.as_ref().ok().and_then(|r| r.cost).unwrap_or(0.0);
            slot.with_perf(|p| p.record_attempt(latency_ms, cost, accepted));
            RELAY_SUBMISSIONS
                .with_label_values(&[relay_id.as_str(), if accepted { "accepted" } else { "rejected" }])
                .inc();
            self.append_attempt(SubmissionAttempt {
                bundle_id: bundle_id.clone(),
                relay_id: relay_id.clone(),
                timestamp_ms: SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or_default(),
                latency_ms,
                success: accepted,
                failure_reason: result.as_ref().err().map(|e| e.to_string()),
            });

            match result {
                Ok(receipt) => {
                    entry.bundle.transition(BundleStatus::Submitted)?;
                    entry.relay_id = Some(relay_id.clone());
                    entry.receipt = Some(receipt);
                    BUNDLE_STATUS
                        .with_label_values(&[BundleStatus::Submitted.as_str()])
                        .inc();
                    info!(relay = %relay_id, attempts = tried.len(), latency_ms, "bundle submitted");
                    return Ok(SubmissionOutcome {
                        bundle_id,
                        status: BundleStatus::Submitted,
                        relay_id: Some(relay_id),
                        attempts: tried.len(),
                        failure: None,
                    });
                }
                Err(e) => {
                    warn!(relay = %relay_id, error = %e, "submission failed; failing over");
                }
            }
        }

        let failure = if tried.is_empty() {
            SubmissionFailure::NoHealthyRelay
        } else {
            SubmissionFailure::AllRelaysExhausted
        };
        entry.bundle.transition(BundleStatus::Failed)?;
        self.metrics.record_failed();
        warn!(attempts = tried.len(), ?failure, "bundle submission failed");
        Ok(SubmissionOutcome {
            bundle_id,
            status: BundleStatus::Failed,
            relay_id: None,
            attempts: tried.len(),
            failure: Some(failure),
        })
    }

    /// Batch score recomputation; selection reads the cached values.
    pub async fn recompute_scores(&self) -> Vec<(String, u32)> {
        let relays = self.relays.read().await;
        let mut scores: Vec<(String, u32)> = relays
            .iter()
            .map(|(id, slot)| {
                let score = slot.with_perf(|p| {
                    p.score = p.compute_score(&self.policy.health);
                    p.score
                });
                (id.clone(), score)
            })
            .collect();
        drop(relays);
        scores.sort();
        self.metrics.record_relay_scores(&scores);
        debug!(relays = scores.len(), "relay scores recomputed");
        scores
    }

    /// Apply one health-feed update. Unknown relays are ignored.
    pub async fn apply_health_update(&self, update: &HealthUpdate) -> bool {
        let relays = self.relays.read().await;
        let Some(slot) = relays.get(&update.relay_id) else {
            warn!(relay = %update.relay_id, "health update for unknown relay");
            return false;
        };
        let active = slot.with_perf(|p| {
            p.apply_health(update, &self.policy.health);
            p.active
        });
        debug!(relay = %update.relay_id, latency_ms = update.latency_ms, active, "health update");
        true
    }

    /// Drain a health feed until it closes.
    pub async fn consume_health_feed<S>(&self, mut feed: S)
    where
        S: Stream<Item = HealthUpdate> + Unpin,
    {
        while let Some(update) = feed.next().await {
            self.apply_health_update(&update).await;
        }
        info!("health feed closed");
    }

    pub async fn record_inclusion(&self, relay_id: &str) {
        let relays = self.relays.read().await;
        if let Some(slot) = relays.get(relay_id) {
            slot.with_perf(|p| p.record_inclusion());
        }
    }

    pub async fn relay_performance(&self, relay_id: &str) -> Option<RelayPerformance> {
        let relays = self.relays.read().await;
        relays.get(relay_id).map(|slot| slot.with_perf(|p| p.clone()))
    }

    pub async fn relays(&self) -> Vec<RelayPerformance> {
        let relays = self.relays.read().await;
        let mut all: Vec<RelayPerformance> = relays.values().map(|s| s.with_perf(|p| p.clone())).collect();
        all.sort_by(|a, b| a.relay_id.cmp(&b.relay_id));
        all
    }

    /// Ids of relays currently passing the health rules.
    pub async fn active_relays(&self) -> Vec<String> {
        self.relays()
            .await
            .into_iter()
            .filter(|p| p.is_healthy(&self.policy.health))
            .map(|p| p.relay_id)
            .collect()
    }

    pub fn attempts_for(&self, bundle_id: &str) -> Vec<SubmissionAttempt> {
        let attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.get(bundle_id).cloned().unwrap_or_default()
    }

    pub async fn bundle(&self, bundle_id: &str) -> Option<Bundle> {
        let tracked = self.bundles.read().await.get(bundle_id).cloned()?;
        let entry = tracked.lock().await;
        Some(entry.bundle.clone())
    }

    pub async fn bundle_count(&self) -> usize {
        self.bundles.read().await.len()
    }

    /// Non-terminal bundles with their inclusion evidence and poll cursor.
    /// Bundles locked by an in-flight submission are left for the next sweep.
    pub async fn inclusion_probes(&self) -> Vec<InclusionProbe> {
        let tracked: Vec<_> = self.bundles.read().await.values().cloned().collect();
        let mut probes = Vec::new();
        for bundle in tracked {
            let Ok(entry) = bundle.try_lock() else {
                continue;
            };
            if entry.bundle.status.is_terminal() {
                continue;
            }
            probes.push(InclusionProbe {
                bundle_id: entry.bundle.id.clone(),
                status: entry.bundle.status,
                evidence: entry.receipt.as_ref().map(|r| r.evidence()).unwrap_or_default(),
                next_block: entry.next_block,
                max_block_number: entry.bundle.max_block_number,
            });
        }
        probes
    }

    async fn entry(&self, bundle_id: &str) -> Result<Arc<tokio::sync::Mutex<TrackedBundle>>, AggrError> {
        self.bundles
            .read()
            .await
            .get(bundle_id)
            .cloned()
            .ok_or_else(|| AggrError::UnknownBundle(bundle_id.to_string()))
    }

    /// Move the poll cursor forward. It never moves back.
    pub async fn advance_cursor(&self, bundle_id: &str, next_block: u64) -> Result<(), AggrError> {
        let tracked = self.entry(bundle_id).await?;
        let mut entry = tracked.lock().await;
        entry.next_block = entry.next_block.max(next_block);
        Ok(())
    }

    /// Inclusion evidence found. Feeds the including relay's performance.
    pub async fn mark_included(&self, bundle_id: &str, block: u64) -> Result<(), AggrError> {
        let tracked = self.entry(bundle_id).await?;
        let mut entry = tracked.lock().await;
        entry.bundle.transition(BundleStatus::Included)?;
        entry.next_block = block + 1;
        let relay_id = entry.relay_id.clone();
        self.metrics
            .record_included(entry.bundle.expected_profit, entry.bundle.gas_limit);
        drop(entry);

        if let Some(relay_id) = relay_id {
            self.record_inclusion(&relay_id).await;
            info!(bundle = %bundle_id, relay = %relay_id, block, "bundle included");
        }
        Ok(())
    }

    pub async fn mark_expired(&self, bundle_id: &str) -> Result<(), AggrError> {
        let tracked = self.entry(bundle_id).await?;
        let mut entry = tracked.lock().await;
        entry.bundle.transition(BundleStatus::Expired)?;
        self.metrics.record_expired();
        info!(bundle = %bundle_id, max_block = entry.bundle.max_block_number, "bundle expired");
        Ok(())
    }

    /// Drop bundles (and their audit trail) older than `max_age`.
    pub async fn gc(&self, max_age: Duration) -> usize {
        let tracked: Vec<(String, Arc<tokio::sync::Mutex<TrackedBundle>>)> = self
            .bundles
            .read()
            .await
            .iter()
            .map(|(id, b)| (id.clone(), b.clone()))
            .collect();
        let mut stale = Vec::new();
        for (id, bundle) in tracked {
            if bundle.lock().await.created_at.elapsed() > max_age {
                stale.push(id);
            }
        }
        if stale.is_empty() {
            return 0;
        }

        let mut bundles = self.bundles.write().await;
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        for id in &stale {
            bundles.remove(id);
            attempts.remove(id);
        }
        debug!(collected = stale.len(), "collected stale bundles");
        stale.len()
    }
}

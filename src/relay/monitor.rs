// Inclusion monitor
//
// Periodically polls the ledger for evidence that submitted bundles landed,
// expires bundles whose block window has passed and garbage-collects old
// bundle records.
//
// Numan Thabit 2025 Nov

use crate::errors::AggrError;
use crate::relay::aggregator::RelayAggregator;
use crate::router::bundle::BundleStatus;
use crate::transport::{Block, Ledger};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
	pub current_block: u64,
	pub checked: usize,
	pub included: usize,
	pub expired: usize,
	pub collected: usize,
}

pub struct InclusionMonitor {
	ledger: Arc<dyn Ledger>,
	aggregator: Arc<RelayAggregator>,
	max_bundle_age: Duration,
}

impl InclusionMonitor {
	pub fn new(ledger: Arc<dyn Ledger>, aggregator: Arc<RelayAggregator>, max_bundle_age: Duration) -> Self {
		Self { ledger, aggregator, max_bundle_age }
	}

	/// One pass over every non-terminal bundle. Each block is fetched at most
	/// once per sweep.
	pub async fn sweep(&self) -> Result<SweepReport, AggrError> {
		let current_block = self.ledger.get_current_block().await?;
		let probes = self.aggregator.inclusion_probes().await;
		let mut report = SweepReport { current_block, checked: probes.len(), ..SweepReport::default() };
		let mut cache: HashMap<u64, Block> = HashMap::new();

		for probe in probes {
			// Stale Pending bundles have nothing to poll.
			let mut window_polled = true;
			if probe.status == BundleStatus::Submitted {
				let last = current_block.min(probe.max_block_number);
				let mut included_at = None;
				let mut polled_to = probe.next_block;
				for number in probe.next_block..=last {
					if !cache.contains_key(&number) {
						match self.ledger.get_block(number).await {
							Ok(block) => {
								cache.insert(number, block);
							}
							Err(e) => {
								warn!(block = number, error = %e, "block fetch failed; resuming next sweep");
								break;
							}
						}
					}
					polled_to = number + 1;
					let landed = cache
						.get(&number)
						.map_or(false, |b| b.transactions.iter().any(|tx| probe.evidence.contains(tx)));
					if landed {
						included_at = Some(number);
						break;
					}
				}

				if let Some(block) = included_at {
					match self.aggregator.mark_included(&probe.bundle_id, block).await {
						Ok(()) => report.included += 1,
						Err(e) => warn!(bundle = %probe.bundle_id, error = %e, "inclusion not recorded"),
					}
					continue;
				}
				if let Err(e) = self.aggregator.advance_cursor(&probe.bundle_id, polled_to).await {
					warn!(bundle = %probe.bundle_id, error = %e, "poll cursor not advanced");
					continue;
				}
				window_polled = polled_to > probe.max_block_number;
			}

			if window_polled && current_block > probe.max_block_number {
				match self.aggregator.mark_expired(&probe.bundle_id).await {
					Ok(()) => report.expired += 1,
					// Raced with a concurrent transition or collection.
					Err(AggrError::InvalidTransition { .. } | AggrError::UnknownBundle(_)) => {}
					Err(e) => return Err(e),
				}
			}
		}

		report.collected = self.aggregator.gc(self.max_bundle_age).await;
		if report.included + report.expired + report.collected > 0 {
			info!(
				current_block,
				included = report.included,
				expired = report.expired,
				collected = report.collected,
				"inclusion sweep"
			);
		} else {
			debug!(current_block, checked = report.checked, "inclusion sweep");
		}
		Ok(report)
	}

	/// Run `sweep` every `interval` until the task is aborted.
	pub fn spawn(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
			loop {
				ticker.tick().await;
				if let Err(err) = self.sweep().await {
					warn!(error = %err, "inclusion sweep failed; retrying");
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::errors::RelayError;
	use crate::metrics::MetricsCollector;
	use crate::relay::aggregator::RelayPolicy;
	use crate::relay::performance::SelectionStrategy;
	use crate::router::bundle::{BundleBuilder, BundleStrategy};
	use crate::router::routes::{Route, ScoringPolicy};
	use crate::transport::{BundlePayload, RelayClient, RelayReceipt};
	use crate::venues::testing::StaticLedger;
	use crate::venues::{PricingFamily, Quote};
	use async_trait::async_trait;
	use std::collections::HashSet;

	struct EchoRelay;

	#[async_trait]
	impl RelayClient for EchoRelay {
		fn id(&self) -> &str {
			"echo"
		}

		async fn submit_bundle(&self, payload: &BundlePayload) -> Result<RelayReceipt, RelayError> {
			Ok(RelayReceipt {
				bundle_hash: format!("0x{}", payload.bundle_id),
				tx_hashes: vec![],
				cost: None,
			})
		}
	}

	fn route() -> Route {
		let quote = Quote {
			venue: "v".into(),
			family: PricingFamily::ConstantProduct,
			token_in: "WETH".into(),
			token_out: "USDC".into(),
			amount_in: 1.0,
			amount_out: 2000.0,
			price_impact: 0.01,
			gas_estimate: 100_000,
			pool_ref: "p".into(),
			fee: Some(3000),
		};
		Route::from_quotes(&[quote], 0.0, &ScoringPolicy::default()).unwrap()
	}

	/// Submits one bundle per strategy, all built at block 10 (window 11..=14).
	async fn submitted(strategies: &[BundleStrategy]) -> (Arc<RelayAggregator>, Vec<String>) {
		let submit_ledger = StaticLedger { current_block: 10, ..StaticLedger::default() };
		let aggregator = Arc::new(RelayAggregator::new(
			Arc::new(submit_ledger),
			Arc::new(MetricsCollector::new()),
			RelayPolicy::default(),
		));
		aggregator.register_relay(Arc::new(EchoRelay)).await;
		let mut ids = Vec::new();
		for strategy in strategies {
			let bundle = BundleBuilder::new(30, 2, 3).build(&route(), *strategy, 10).unwrap();
			ids.push(bundle.id.clone());
			aggregator.submit_with_failover(bundle, SelectionStrategy::Balanced).await.unwrap();
		}
		(aggregator, ids)
	}

	async fn setup_with(ledger: StaticLedger) -> (InclusionMonitor, Arc<RelayAggregator>, String) {
		let (aggregator, mut ids) = submitted(&[BundleStrategy::Standard]).await;
		let monitor = InclusionMonitor::new(Arc::new(ledger), aggregator.clone(), Duration::from_secs(3600));
		(monitor, aggregator, ids.remove(0))
	}

	async fn setup(current_block: u64, blocks: HashMap<u64, Vec<String>>) -> (InclusionMonitor, Arc<RelayAggregator>, String) {
		setup_with(StaticLedger { current_block, blocks, ..StaticLedger::default() }).await
	}

	#[tokio::test]
	async fn evidence_marks_bundle_included() {
		let expected = BundleBuilder::new(30, 2, 3).build(&route(), BundleStrategy::Standard, 10).unwrap();
		let mut blocks = HashMap::new();
		blocks.insert(12, vec!["0xother".to_string(), format!("0x{}", expected.id)]);
		let (monitor, aggregator, id) = setup(13, blocks).await;

		let report = monitor.sweep().await.unwrap();
		assert_eq!(report.included, 1);
		assert_eq!(aggregator.bundle(&id).await.unwrap().status, BundleStatus::Included);
		assert_eq!(aggregator.relay_performance("echo").await.unwrap().successful_inclusions, 1);
	}

	#[tokio::test]
	async fn missing_evidence_past_window_expires() {
		let (monitor, aggregator, id) = setup(15, HashMap::new()).await;
		let report = monitor.sweep().await.unwrap();
		assert_eq!(report.expired, 1);
		assert_eq!(aggregator.bundle(&id).await.unwrap().status, BundleStatus::Expired);
		assert_eq!(aggregator.metrics().snapshot().expired_bundles, 1);
	}

	#[tokio::test]
	async fn bundle_inside_window_stays_submitted() {
		let (monitor, aggregator, id) = setup(12, HashMap::new()).await;
		let report = monitor.sweep().await.unwrap();
		assert_eq!(report.included + report.expired, 0);
		assert_eq!(aggregator.bundle(&id).await.unwrap().status, BundleStatus::Submitted);
		let probe = aggregator.inclusion_probes().await.pop().unwrap();
		assert_eq!(probe.next_block, 13);
	}

	#[tokio::test]
	async fn failed_block_fetch_defers_expiry_until_window_is_polled() {
		let expected = BundleBuilder::new(30, 2, 3).build(&route(), BundleStrategy::Standard, 10).unwrap();
		let mut blocks = HashMap::new();
		blocks.insert(13, vec![format!("0x{}", expected.id)]);
		let flaky = StaticLedger {
			current_block: 15,
			blocks: blocks.clone(),
			failing_blocks: HashSet::from([12]),
			..StaticLedger::default()
		};
		let (monitor, aggregator, id) = setup_with(flaky).await;

		let report = monitor.sweep().await.unwrap();
		assert_eq!(report.included + report.expired, 0);
		assert_eq!(aggregator.bundle(&id).await.unwrap().status, BundleStatus::Submitted);
		assert_eq!(aggregator.inclusion_probes().await.pop().unwrap().next_block, 12);

		// Ledger recovers: the landed bundle is found rather than expired.
		let healthy = StaticLedger { current_block: 15, blocks, ..StaticLedger::default() };
		let monitor = InclusionMonitor::new(Arc::new(healthy), aggregator.clone(), Duration::from_secs(3600));
		let report = monitor.sweep().await.unwrap();
		assert_eq!((report.included, report.expired), (1, 0));
		assert_eq!(aggregator.bundle(&id).await.unwrap().status, BundleStatus::Included);
		assert_eq!(aggregator.metrics().snapshot().expired_bundles, 0);
	}

	/// Collects every tracked bundle the first time a block is fetched.
	struct CollectingLedger {
		aggregator: Arc<RelayAggregator>,
		blocks: HashMap<u64, Vec<String>>,
	}

	#[async_trait]
	impl Ledger for CollectingLedger {
		async fn get_quote(
			&self,
			_venue: &str,
			_token_in: &str,
			_token_out: &str,
			_amount_in: f64,
			_fee_tier: Option<u32>,
		) -> Result<f64, AggrError> {
			Err(AggrError::Provider("no quoter".into()))
		}

		async fn get_pool_state(&self, _venue: &str, pool_ref: &str) -> Result<crate::transport::PoolState, AggrError> {
			Err(AggrError::Provider(format!("unknown pool {pool_ref}")))
		}

		async fn get_block(&self, number: u64) -> Result<Block, AggrError> {
			self.aggregator.gc(Duration::ZERO).await;
			Ok(Block { number, transactions: self.blocks.get(&number).cloned().unwrap_or_default() })
		}

		async fn get_current_block(&self) -> Result<u64, AggrError> {
			Ok(12)
		}
	}

	#[tokio::test]
	async fn bundles_collected_mid_sweep_do_not_abort_it() {
		let (aggregator, ids) = submitted(&[BundleStrategy::Standard, BundleStrategy::Aggressive]).await;
		let mut blocks = HashMap::new();
		blocks.insert(11, vec![format!("0x{}", ids[0])]);
		let ledger = CollectingLedger { aggregator: aggregator.clone(), blocks };
		let monitor = InclusionMonitor::new(Arc::new(ledger), aggregator.clone(), Duration::from_secs(3600));
		tokio::time::sleep(Duration::from_millis(2)).await;

		let report = monitor.sweep().await.unwrap();
		assert_eq!(report.checked, 2);
		assert_eq!(report.included + report.expired, 0);
		assert_eq!(aggregator.bundle_count().await, 0);
	}
}

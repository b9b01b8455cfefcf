use anyhow::{anyhow, Context, Result};
use relay_aggr::config::AppConfig;
use relay_aggr::control::AdmissionControl;
use relay_aggr::metrics::MetricsCollector;
use relay_aggr::relay::{InclusionMonitor, RelayAggregator};
use relay_aggr::router::router::create_api_router;
use relay_aggr::router::{ArbitrageDetector, BundleBuilder, CycleSettings, RouteOptimizer, Router};
use relay_aggr::transport::{HttpRelayClient, JsonRpcLedger, Ledger, RelayClient};
use relay_aggr::venues::{build_adapter, VenueAdapter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("initialize tracing subscriber")?;

    if let Err(err) = run().await {
        tracing::error!(error = ?err, "fatal aggregator error");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let config = AppConfig::load().context("load configuration")?;

    let ledger: Arc<dyn Ledger> = Arc::new(
        JsonRpcLedger::new(config.ledger_endpoint.as_str(), config.request_timeout())
            .context("initialize ledger client")?,
    );

    let adapters: Vec<Arc<dyn VenueAdapter>> = config
        .venues
        .iter()
        .cloned()
        .map(|venue| build_adapter(venue, ledger.clone()))
        .collect();
    if adapters.is_empty() {
        warn!("no venues configured; route search will return nothing");
    }

    let admission = AdmissionControl::new(config.max_inflight, config.rate_per_sec);
    let optimizer = Arc::new(
        RouteOptimizer::new(
            adapters,
            admission,
            config.quote_timeout(),
            config.intermediate_tokens.clone(),
        )
        .with_policy(config.scoring.clone())
        .with_beam_width(config.beam_width),
    );
    let max_hops = config.scan.as_ref().map_or(1, |s| s.max_hops);
    let detector = Arc::new(ArbitrageDetector::new(optimizer.clone(), max_hops));

    let metrics = Arc::new(MetricsCollector::new());
    let aggregator = Arc::new(RelayAggregator::new(
        ledger.clone(),
        metrics.clone(),
        config.relay_policy.clone(),
    ));
    for relay in &config.relays {
        let client = HttpRelayClient::new(
            relay.id.clone(),
            relay.url.as_str(),
            config.request_timeout(),
            relay.default_cost.unwrap_or(0.0),
        )
        .with_context(|| format!("initialize relay client {}", relay.id))?;
        aggregator.register_relay(Arc::new(client) as Arc<dyn RelayClient>).await;
    }
    aggregator.recompute_scores().await;

    let builder = BundleBuilder::new(
        config.bundle.base_fee,
        config.bundle.priority_fee,
        config.bundle.block_window,
    );

    let (health_tx, health_rx) = mpsc::channel(256);
    let router = Arc::new(
        Router::new(optimizer, detector, builder, aggregator.clone(), ledger.clone())
            .with_health_feed(health_tx),
    );

    let app = App {
        config: Arc::new(config),
        ledger,
        router,
        aggregator,
        metrics,
    };
    app.run(health_rx).await
}

struct App {
    config: Arc<AppConfig>,
    ledger: Arc<dyn Ledger>,
    router: Arc<Router>,
    aggregator: Arc<RelayAggregator>,
    metrics: Arc<MetricsCollector>,
}

impl App {
    async fn run(self, health_rx: mpsc::Receiver<relay_aggr::relay::HealthUpdate>) -> Result<()> {
        match self.ledger.get_current_block().await {
            Ok(block) => info!(block, "ledger reachable"),
            Err(err) => warn!(error = %err, "ledger readiness probe failed; continuing"),
        }

        info!(
            ledger = %self.config.ledger_endpoint,
            venues = self.config.venues.len(),
            relays = self.config.relays.len(),
            "relay aggregator online"
        );

        // Health feed consumer
        let feed_aggregator = self.aggregator.clone();
        let _feed_handle = tokio::spawn(async move {
            feed_aggregator
                .consume_health_feed(ReceiverStream::new(health_rx))
                .await;
        });

        // Inclusion monitor
        let monitor = Arc::new(InclusionMonitor::new(
            self.ledger.clone(),
            self.aggregator.clone(),
            Duration::from_secs(self.config.monitor.max_bundle_age_secs),
        ));
        let _monitor_handle =
            monitor.spawn(Duration::from_millis(self.config.monitor.sweep_interval_ms.max(1)));
        info!("started inclusion monitor");

        // Batch score recomputation
        let score_aggregator = self.aggregator.clone();
        let score_interval = Duration::from_secs(self.config.monitor.score_interval_secs.max(1));
        let _score_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(score_interval);
            loop {
                ticker.tick().await;
                score_aggregator.recompute_scores().await;
            }
        });

        // Detection cycle
        if let Some(scan) = self.config.scan.clone() {
            let settings = CycleSettings {
                pairs: scan
                    .pairs
                    .iter()
                    .map(|p| (p.token_a.clone(), p.token_b.clone()))
                    .collect(),
                amount_in: scan.amount_in,
                gas_cost: scan.gas_cost,
                max_opportunities: scan.max_opportunities,
                bundle_strategy: self.config.bundle.strategy,
                selection: self.config.bundle.selection,
            };
            let cycle_router = self.router.clone();
            let interval = Duration::from_millis(scan.interval_ms.max(100));
            let _cycle_handle = tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    if let Err(err) = cycle_router.run_cycle(&settings).await {
                        warn!(error = %err, "detection cycle failed");
                    }
                }
            });
            info!(pairs = scan.pairs.len(), "started detection cycle");
        } else {
            warn!("scan settings not provided; detection cycle disabled");
        }

        // Start HTTP API server
        let api_router = create_api_router(self.router.clone()).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );
        let api_addr = self.config.socket_addr()?;
        let listener = tokio::net::TcpListener::bind(api_addr)
            .await
            .with_context(|| format!("bind API server address {api_addr}"))?;
        info!(address = %api_addr, "HTTP API server starting");
        let _api_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, api_router).await {
                warn!(error = %e, "API server error");
            }
        });

        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let snapshot = self.metrics.snapshot();
                    let active = self.aggregator.active_relays().await;
                    info!(
                        total_bundles = snapshot.total_bundles,
                        included = snapshot.successful_bundles,
                        failed = snapshot.failed_bundles,
                        expired = snapshot.expired_bundles,
                        profitability = snapshot.profitability_score,
                        active_relays = active.len(),
                        "aggregator heartbeat"
                    );
                }
                res = tokio::signal::ctrl_c() => {
                    if let Err(err) = res {
                        warn!(error = %err, "ctrl_c listener error");
                    }
                    info!("Shutdown signal received, exiting");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn init_tracing() -> Result<()> {
    let env_filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow!("tracing subscriber init: {err}"))
}

// Router pipeline and HTTP API implementation
// This file ties detection, bundle construction and relay submission into one
// cycle and exposes the route, opportunity, metrics and relay endpoints
//
// Numan Thabit 2025 Nov

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router as AxumRouter,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::arbitrage::{ArbitrageDetector, Opportunity};
use super::bundle::{BundleBuilder, BundleStrategy};
use super::optimizer::{RouteOptimizer, RouteQuery};
use super::routes::Route;
use crate::errors::AggrError;
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::relay::{HealthUpdate, RelayAggregator, RelayPerformance, SelectionStrategy, SubmissionOutcome};
use crate::transport::Ledger;

/// Fixed pair list and sizing for the periodic detection cycle.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub pairs: Vec<(String, String)>,
    pub amount_in: f64,
    pub gas_cost: f64,
    pub max_opportunities: usize,
    pub bundle_strategy: BundleStrategy,
    pub selection: SelectionStrategy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub block: u64,
    pub opportunities: usize,
    pub outcomes: Vec<SubmissionOutcome>,
}

/// High-level Router that ties route discovery, bundling and submission together
pub struct Router {
    optimizer: Arc<RouteOptimizer>,
    detector: Arc<ArbitrageDetector>,
    builder: BundleBuilder,
    aggregator: Arc<RelayAggregator>,
    ledger: Arc<dyn Ledger>,
    health_feed: Option<mpsc::Sender<HealthUpdate>>,
}

impl Router {
    pub fn new(
        optimizer: Arc<RouteOptimizer>,
        detector: Arc<ArbitrageDetector>,
        builder: BundleBuilder,
        aggregator: Arc<RelayAggregator>,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self {
            optimizer,
            detector,
            builder,
            aggregator,
            ledger,
            health_feed: None,
        }
    }

    /// Route pushed health updates through a feed channel instead of applying
    /// them inline.
    pub fn with_health_feed(mut self, feed: mpsc::Sender<HealthUpdate>) -> Self {
        self.health_feed = Some(feed);
        self
    }

    /// Accept one health update. Returns false for unknown relays.
    pub async fn push_health(&self, update: HealthUpdate) -> Result<bool, AggrError> {
        if self.aggregator.relay_performance(&update.relay_id).await.is_none() {
            return Ok(false);
        }
        match &self.health_feed {
            Some(feed) => feed
                .send(update)
                .await
                .map_err(|_| AggrError::Transport("health feed closed".into()))?,
            None => {
                self.aggregator.apply_health_update(&update).await;
            }
        }
        Ok(true)
    }

    pub fn optimizer(&self) -> &Arc<RouteOptimizer> {
        &self.optimizer
    }

    pub fn aggregator(&self) -> &Arc<RelayAggregator> {
        &self.aggregator
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        self.aggregator.metrics()
    }

    pub async fn find_routes(&self, query: &RouteQuery) -> Vec<Route> {
        self.optimizer.find_routes(query).await
    }

    pub async fn find_opportunities(
        &self,
        token_a: &str,
        token_b: &str,
        amount_in: f64,
        gas_cost: f64,
        max_results: usize,
    ) -> Vec<Opportunity> {
        self.detector
            .find_opportunities(token_a, token_b, amount_in, gas_cost, max_results)
            .await
    }

    /// Bundle an opportunity's closed route and push it through failover.
    pub async fn submit_opportunity(
        &self,
        opportunity: &Opportunity,
        strategy: BundleStrategy,
        selection: SelectionStrategy,
        current_block: u64,
    ) -> Result<SubmissionOutcome, AggrError> {
        let bundle = self
            .builder
            .build(&opportunity.route, strategy, current_block)?
            .with_expected_profit(opportunity.net_profit);
        self.aggregator.submit_with_failover(bundle, selection).await
    }

    /// One detection → build → submit pass over the configured pairs.
    /// Independent bundles are submitted concurrently.
    #[tracing::instrument(skip_all, fields(pairs = settings.pairs.len()))]
    pub async fn run_cycle(&self, settings: &CycleSettings) -> Result<CycleReport, AggrError> {
        let block = self.ledger.get_current_block().await?;

        let searches = settings.pairs.iter().map(|(a, b)| {
            self.detector.find_opportunities(
                a,
                b,
                settings.amount_in,
                settings.gas_cost,
                settings.max_opportunities,
            )
        });
        let mut found: Vec<Opportunity> = join_all(searches).await.into_iter().flatten().collect();
        found.sort_by(|a, b| b.net_profit.total_cmp(&a.net_profit));
        found.truncate(settings.max_opportunities);

        let submissions = found.iter().map(|opp| {
            self.submit_opportunity(opp, settings.bundle_strategy, settings.selection, block)
        });
        let mut outcomes = Vec::with_capacity(found.len());
        for result in join_all(submissions).await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                // A bundle for the same route and block is already in flight.
                Err(AggrError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        info!(
            block,
            opportunities = found.len(),
            submitted = outcomes.iter().filter(|o| o.failure.is_none()).count(),
            "cycle complete"
        );
        Ok(CycleReport {
            block,
            opportunities: found.len(),
            outcomes,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
}

fn default_max_results() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct OpportunityRequest {
    pub token_a: String,
    pub token_b: String,
    pub amount_in: f64,
    #[serde(default)]
    pub gas_cost: f64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

/// Create the HTTP router with API endpoints
pub fn create_api_router(router: Arc<Router>) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/v1/routes", post(find_routes))
        .route("/api/v1/opportunities", post(find_opportunities))
        .route("/api/v1/metrics", get(get_metrics))
        .route("/api/v1/relays", get(list_relays))
        .route("/api/v1/relays/health", post(relay_health))
        .route("/api/v1/relays/:id", get(get_relay))
        .with_state(router)
}

/// Health check endpoint
async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus text exposition
async fn prometheus_metrics() -> Response {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    match encoder.encode(&prometheus::gather(), &mut buf) {
        Ok(()) => ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buf).into_response(),
        Err(e) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
    }
}

async fn find_routes(
    State(router): State<Arc<Router>>,
    Json(query): Json<RouteQuery>,
) -> Result<Json<Vec<Route>>, ApiError> {
    if !(query.amount_in.is_finite() && query.amount_in > 0.0) {
        return Err(api_error(StatusCode::BAD_REQUEST, "amount_in must be positive"));
    }
    Ok(Json(router.find_routes(&query).await))
}

async fn find_opportunities(
    State(router): State<Arc<Router>>,
    Json(req): Json<OpportunityRequest>,
) -> Result<Json<Vec<Opportunity>>, ApiError> {
    if !(req.amount_in.is_finite() && req.amount_in > 0.0) {
        return Err(api_error(StatusCode::BAD_REQUEST, "amount_in must be positive"));
    }
    let found = router
        .find_opportunities(&req.token_a, &req.token_b, req.amount_in, req.gas_cost, req.max_results)
        .await;
    Ok(Json(found))
}

async fn get_metrics(State(router): State<Arc<Router>>) -> Json<MetricsSnapshot> {
    Json(router.metrics().snapshot())
}

async fn list_relays(State(router): State<Arc<Router>>) -> Json<Vec<RelayPerformance>> {
    Json(router.aggregator().relays().await)
}

async fn get_relay(
    State(router): State<Arc<Router>>,
    Path(id): Path<String>,
) -> Result<Json<RelayPerformance>, ApiError> {
    router
        .aggregator()
        .relay_performance(&id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown relay {id}")))
}

/// Health-feed push endpoint
async fn relay_health(
    State(router): State<Arc<Router>>,
    Json(update): Json<HealthUpdate>,
) -> Result<StatusCode, ApiError> {
    let relay_id = update.relay_id.clone();
    match router.push_health(update).await {
        Ok(true) => Ok(StatusCode::ACCEPTED),
        Ok(false) => {
            warn!(relay = %relay_id, "rejected health update");
            Err(api_error(StatusCode::NOT_FOUND, format!("unknown relay {relay_id}")))
        }
        Err(e) => Err(api_error(StatusCode::SERVICE_UNAVAILABLE, e)),
    }
}

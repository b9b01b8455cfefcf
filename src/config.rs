// Configuration management module
// This file handles loading and parsing of configuration settings
// from an optional config file and environment variables
//
// Numan Thabit 2025 Nov

use crate::relay::{RelayPolicy, SelectionStrategy};
use crate::router::bundle::BundleStrategy;
use crate::router::routes::ScoringPolicy;
use crate::venues::Venue;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

fn default_api_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_inflight() -> usize {
    64
}

fn default_quote_timeout_ms() -> u64 {
    3_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_beam_width() -> usize {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Ledger JSON-RPC endpoint
    pub ledger_endpoint: Url,
    /// HTTP API listen address
    #[serde(default = "default_api_addr")]
    pub api_addr: String,
    /// Concurrent upstream quote calls
    #[serde(default = "default_max_inflight")]
    pub max_inflight: usize,
    /// Upstream quote calls per second (unbounded default of 200)
    pub rate_per_sec: Option<u32>,
    #[serde(default = "default_quote_timeout_ms")]
    pub quote_timeout_ms: u64,
    /// Timeout for ledger and relay HTTP requests
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub venues: Vec<Venue>,
    #[serde(default)]
    pub relays: Vec<RelayEndpoint>,
    /// Curated tokens multi-hop paths may pass through
    #[serde(default)]
    pub intermediate_tokens: Vec<String>,
    #[serde(default)]
    pub scoring: ScoringPolicy,
    #[serde(default = "default_beam_width")]
    pub beam_width: usize,
    #[serde(default)]
    pub relay_policy: RelayPolicy,
    #[serde(default)]
    pub bundle: BundleSettings,
    #[serde(default)]
    pub monitor: MonitorSettings,
    /// Periodic arbitrage scan; disabled when absent
    pub scan: Option<ScanSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayEndpoint {
    pub id: String,
    pub url: Url,
    /// Cost assumed when the relay does not report one
    pub default_cost: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BundleSettings {
    pub base_fee: u64,
    pub priority_fee: u64,
    pub block_window: u64,
    pub strategy: BundleStrategy,
    pub selection: SelectionStrategy,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            base_fee: 30,
            priority_fee: 2,
            block_window: 3,
            strategy: BundleStrategy::Standard,
            selection: SelectionStrategy::Balanced,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub sweep_interval_ms: u64,
    pub max_bundle_age_secs: u64,
    pub score_interval_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 2_000,
            max_bundle_age_secs: 3_600,
            score_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanPair {
    pub token_a: String,
    pub token_b: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanSettings {
    pub pairs: Vec<ScanPair>,
    pub amount_in: f64,
    /// Gas cost per opportunity, in each pair's token_b
    #[serde(default)]
    pub gas_cost: f64,
    #[serde(default)]
    pub max_hops: usize,
    #[serde(default = "default_max_opportunities")]
    pub max_opportunities: usize,
    #[serde(default = "default_scan_interval_ms")]
    pub interval_ms: u64,
}

fn default_max_opportunities() -> usize {
    3
}

fn default_scan_interval_ms() -> u64 {
    12_000
}

impl AppConfig {
    /// Optional file named by `APP_CONFIG`, overlaid with `APP__*` variables.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("APP_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path));
        }
        let cfg = builder
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()
            .context("assemble configuration sources")?;
        let parsed: Self = cfg.try_deserialize().context("deserialize configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_inflight == 0 {
            bail!("max_inflight must be positive");
        }
        let mut venue_ids = HashSet::new();
        for venue in &self.venues {
            if !venue_ids.insert(venue.id.as_str()) {
                bail!("duplicate venue id: {}", venue.id);
            }
            for pool in &venue.pools {
                if let Some((a, b)) = pool.weights {
                    if !(a.is_finite() && b.is_finite() && a > 0.0 && b > 0.0) {
                        bail!("venue {} pool {}: weights must be positive", venue.id, pool.pool_ref);
                    }
                }
                if let Some(amp) = pool.amplification {
                    if !(amp.is_finite() && amp >= 1.0) {
                        bail!("venue {} pool {}: amplification must be at least 1", venue.id, pool.pool_ref);
                    }
                }
            }
        }
        let mut relay_ids = HashSet::new();
        for relay in &self.relays {
            if !relay_ids.insert(relay.id.as_str()) {
                bail!("duplicate relay id: {}", relay.id);
            }
        }
        if self.relay_policy.max_failover_attempts == 0 {
            bail!("relay_policy.max_failover_attempts must be positive");
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.api_addr
            .parse()
            .with_context(|| format!("invalid api_addr: {}", self.api_addr))
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// Relay transport
// Submission channel abstraction for bundle relays and an HTTP JSON-RPC client
// that speaks the common sendBundle shape
//
// Numan Thabit 2025 Nov

use crate::errors::RelayError;
use crate::metrics::{REQ_ERRORS, REQ_LATENCY};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

/// One swap leg with amounts and deadline fixed at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOperation {
    pub index: usize,
    pub venue: String,
    pub pool_ref: String,
    pub token_in: String,
    pub token_out: String,
    pub fee: Option<u32>,
    pub amount_in: f64,
    pub min_amount_out: f64,
    pub gas_limit: u64,
    pub deadline_block: u64,
}

/// Wire-level view of a bundle handed to a relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundlePayload {
    pub bundle_id: String,
    pub operations: Vec<ResolvedOperation>,
    pub target_block: u64,
    pub max_block_number: u64,
    pub max_priority_fee_per_gas: u64,
    pub max_fee_per_gas: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayReceipt {
    pub bundle_hash: String,
    /// Hashes of the bundle's transactions; inclusion evidence is matched on
    /// these. Empty means the bundle hash itself is the evidence.
    #[serde(default)]
    pub tx_hashes: Vec<String>,
    /// Fee charged by the relay for this submission, if it reports one.
    #[serde(default)]
    pub cost: Option<f64>,
}

impl RelayReceipt {
    pub fn evidence(&self) -> Vec<String> {
        if self.tx_hashes.is_empty() {
            vec![self.bundle_hash.clone()]
        } else {
            self.tx_hashes.clone()
        }
    }
}

#[async_trait]
pub trait RelayClient: Send + Sync {
    fn id(&self) -> &str;

    async fn submit_bundle(&self, payload: &BundlePayload) -> Result<RelayReceipt, RelayError>;
}

/// HTTP relay client. Bundle signing happens upstream; this client only
/// forwards the resolved payload.
#[derive(Debug, Clone)]
pub struct HttpRelayClient {
    id: String,
    http: Client,
    url: String,
    request_timeout: Duration,
    /// Fee assumed when the relay does not report one.
    default_cost: f64,
}

impl HttpRelayClient {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        request_timeout: Duration,
        default_cost: f64,
    ) -> Result<Self, RelayError> {
        let id = id.into();
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RelayError::Transport {
                relay: id.clone(),
                message: format!("build http client: {e}"),
            })?;
        Ok(Self {
            id,
            http,
            url: url.into(),
            request_timeout,
            default_cost,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    fn transport_err(&self, message: String) -> RelayError {
        RelayError::Transport {
            relay: self.id.clone(),
            message,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendBundleResult {
    bundle_hash: String,
    #[serde(default)]
    tx_hashes: Vec<String>,
    #[serde(default)]
    cost: Option<f64>,
}

#[async_trait]
impl RelayClient for HttpRelayClient {
    fn id(&self) -> &str {
        &self.id
    }

    async fn submit_bundle(&self, payload: &BundlePayload) -> Result<RelayReceipt, RelayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_sendBundle",
            "params": [{
                "bundleId": payload.bundle_id,
                "operations": payload.operations,
                "blockNumber": format!("0x{:x}", payload.target_block),
                "maxBlockNumber": format!("0x{:x}", payload.max_block_number),
                "maxPriorityFeePerGas": payload.max_priority_fee_per_gas,
                "maxFeePerGas": payload.max_fee_per_gas,
            }]
        });

        let timer = REQ_LATENCY
            .with_label_values(&[self.id.as_str(), "eth_sendBundle"])
            .start_timer();
        let resp = self.http.post(&self.url).json(&body).send().await;
        timer.observe_duration();

        let resp = resp.map_err(|e| {
            REQ_ERRORS
                .with_label_values(&[self.id.as_str(), "eth_sendBundle"])
                .inc();
            if e.is_timeout() {
                RelayError::Timeout {
                    relay: self.id.clone(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                }
            } else {
                self.transport_err(format!("send: {e}"))
            }
        })?;

        if !resp.status().is_success() {
            return Err(RelayError::Rejected {
                relay: self.id.clone(),
                reason: format!("http {}", resp.status()),
            });
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| self.transport_err(format!("json parse: {e}")))?;
        if let Some(err) = body.get("error") {
            return Err(RelayError::Rejected {
                relay: self.id.clone(),
                reason: err.to_string(),
            });
        }
        let result: SendBundleResult = serde_json::from_value(body["result"].clone())
            .map_err(|e| self.transport_err(format!("decode result: {e}")))?;

        Ok(RelayReceipt {
            bundle_hash: result.bundle_hash,
            tx_hashes: result.tx_hashes,
            cost: result.cost.or(Some(self.default_cost)),
        })
    }
}

// JSON-RPC transport layer implementation
// This file implements the Ledger interface over HTTP JSON-RPC: standard block
// queries plus the settlement gateway's quoter and pool-state methods
//
// Numan Thabit 2025 Nov

use crate::errors::AggrError;
use crate::metrics::{REQ_ERRORS, REQ_LATENCY};
use crate::transport::ledger::{Block, Ledger, PoolState};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct JsonRpcLedger {
    http: Client,
    url: String,
    next_id: AtomicU64,
    max_elapsed: Duration,
}

impl JsonRpcLedger {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, AggrError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AggrError::Transport(format!("build http client: {e}")))?;
        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
            max_elapsed: Duration::from_secs(5),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, AggrError> {
        let timer = REQ_LATENCY.with_label_values(&["ledger", method]).start_timer();
        let result = self.call_once(method, params).await;
        timer.observe_duration();
        if result.is_err() {
            REQ_ERRORS.with_label_values(&["ledger", method]).inc();
        }
        result
    }

    async fn call_once<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, AggrError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let resp = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AggrError::Transport(format!("jsonrpc send: {e}")))?;
        if !resp.status().is_success() {
            return Err(AggrError::Provider(format!("http {}", resp.status())));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| AggrError::Transport(format!("json parse: {e}")))?;
        if let Some(err) = body.get("error") {
            return Err(AggrError::Provider(err.to_string()));
        }
        serde_json::from_value(body["result"].clone())
            .map_err(|e| AggrError::Provider(format!("decode result: {e}")))
    }

    /// Read calls are idempotent, so transport failures are retried with
    /// backoff. Provider errors are returned immediately.
    async fn read<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, AggrError> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(1),
            max_elapsed_time: Some(self.max_elapsed),
            multiplier: 2.0,
            ..Default::default()
        };
        retry(backoff, || {
            let params = params.clone();
            async move {
                self.call(method, params).await.map_err(|e| match e {
                    AggrError::Transport(_) => backoff::Error::transient(e),
                    other => backoff::Error::permanent(other),
                })
            }
        })
        .await
    }
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    number: String,
    #[serde(default)]
    transactions: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcPoolState {
    liquidity: f64,
    price: f64,
    tick_spacing: Option<i32>,
}

fn parse_hex_u64(raw: &str) -> Result<u64, AggrError> {
    let digits = raw.trim_start_matches("0x");
    u64::from_str_radix(digits, 16)
        .map_err(|e| AggrError::Provider(format!("invalid hex quantity {raw}: {e}")))
}

#[async_trait]
impl Ledger for JsonRpcLedger {
    async fn get_quote(
        &self,
        venue: &str,
        token_in: &str,
        token_out: &str,
        amount_in: f64,
        fee_tier: Option<u32>,
    ) -> Result<f64, AggrError> {
        // Quotes are time-sensitive; no retry here, the optimizer's per-call
        // timeout decides.
        self.call(
            "ledger_getQuote",
            json!([venue, token_in, token_out, amount_in, fee_tier]),
        )
        .await
    }

    async fn get_pool_state(&self, venue: &str, pool_ref: &str) -> Result<PoolState, AggrError> {
        let state: RpcPoolState = self
            .call("ledger_getPoolState", json!([venue, pool_ref]))
            .await?;
        Ok(PoolState {
            liquidity: state.liquidity,
            price: state.price,
            tick_spacing: state.tick_spacing,
        })
    }

    async fn get_block(&self, number: u64) -> Result<Block, AggrError> {
        let block: Option<RpcBlock> = self
            .read("eth_getBlockByNumber", json!([format!("0x{number:x}"), false]))
            .await?;
        let block = block.ok_or_else(|| AggrError::Provider(format!("block {number} not found")))?;
        Ok(Block {
            number: parse_hex_u64(&block.number)?,
            transactions: block.transactions,
        })
    }

    async fn get_current_block(&self) -> Result<u64, AggrError> {
        let raw: String = self.read("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&raw)
    }
}

//! HTTP settlement-oracle client (§2.2 "Embedded-vs-HTTP oracle mode").
//!
//! Consults an external settlement oracle service over HTTP, HMAC-signing
//! the request body the same way the donor's resource-server-to-facilitator
//! calls did.

use std::time::Instant;

use async_trait::async_trait;
use gateway_core::hmac::compute_hmac;
use gateway_payments::{SettlementOracle, SettlementOutcome, SettlementQuery, SettlementRecord};
use serde::{Deserialize, Serialize};

use crate::metrics;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OracleRequest<'a> {
    tx_hash: &'a str,
    expected_token: &'a str,
    expected_chain: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OracleResponse {
    settled: bool,
    settled_amount_micro: Option<u64>,
    token: Option<String>,
    chain: Option<String>,
}

pub struct FacilitatorHttpOracle {
    client: reqwest::Client,
    base_url: String,
    hmac_secret: Vec<u8>,
}

impl FacilitatorHttpOracle {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, hmac_secret: Vec<u8>) -> Self {
        Self { client, base_url: base_url.into(), hmac_secret }
    }
}

#[async_trait]
impl SettlementOracle for FacilitatorHttpOracle {
    async fn check(&self, query: &SettlementQuery) -> SettlementOutcome {
        let started = Instant::now();
        let body = OracleRequest {
            tx_hash: &query.tx_hash,
            expected_token: &query.expected_token,
            expected_chain: &query.expected_chain,
        };
        let bytes = match serde_json::to_vec(&body) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize oracle request");
                metrics::ORACLE_QUERIES.with_label_values(&["error"]).inc();
                return SettlementOutcome::NotFound;
            }
        };
        let signature = compute_hmac(&self.hmac_secret, &bytes);

        let response = self
            .client
            .post(format!("{}/verify", self.base_url))
            .header("content-type", "application/json")
            .header("X-Facilitator-Auth", signature)
            .body(bytes)
            .send()
            .await;

        let elapsed = started.elapsed().as_secs_f64();
        let outcome = match response {
            Ok(resp) if resp.status().is_success() => match resp.json::<OracleResponse>().await {
                Ok(parsed) if parsed.settled => match (parsed.settled_amount_micro, parsed.token, parsed.chain) {
                    (Some(amount), Some(token), Some(chain)) => {
                        SettlementOutcome::Settled(SettlementRecord { settled_amount_micro: amount, token, chain })
                    }
                    _ => SettlementOutcome::NotFound,
                },
                Ok(_) => SettlementOutcome::NotFound,
                Err(e) => {
                    tracing::warn!(error = %e, "oracle response did not parse");
                    SettlementOutcome::NotFound
                }
            },
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "oracle returned non-success status");
                SettlementOutcome::Mismatch
            }
            Err(e) => {
                tracing::warn!(error = %e, "oracle request failed");
                SettlementOutcome::NotFound
            }
        };

        let label = match &outcome {
            SettlementOutcome::Settled(_) => "settled",
            SettlementOutcome::NotFound => "not_found",
            SettlementOutcome::Mismatch => "mismatch",
        };
        metrics::ORACLE_QUERIES.with_label_values(&[label]).inc();
        metrics::ORACLE_LATENCY.with_label_values(&[label]).observe(elapsed);
        outcome
    }
}

//! HTTP adapter against a slot-contract RPC gateway.
//!
//! Speaks the gateway's JSON envelope: every response carries `status`,
//! `message` and `result`; a status other than `"ok"` is surfaced as an
//! [`AdapterError::Api`] with the gateway's message.

use super::{AdapterError, ChainAdapter};
use crate::types::config::SlotMachineConfig;
use crate::types::spin::{SpinOutcome, SubmitReceipt};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    status: String,
    message: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    bet_per_line: u64,
    paylines: u32,
    wallet: &'a str,
}

#[derive(Debug, Serialize)]
struct ClaimRequest<'a> {
    bet_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: u64,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    height: u64,
}

/// Production adapter talking to an RPC gateway over HTTP.
pub struct RpcAdapter {
    base: Url,
    http_client: reqwest::Client,
}

impl RpcAdapter {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            http_client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, AdapterError> {
        self.base
            .join(path)
            .map_err(|e| AdapterError::Parse(e.to_string()))
    }

    fn unwrap_envelope<T: DeserializeOwned>(envelope: RpcEnvelope) -> Result<T, AdapterError> {
        if envelope.status != "ok" {
            return Err(AdapterError::Api {
                message: envelope.message,
            });
        }
        serde_json::from_value(envelope.result).map_err(|e| AdapterError::Parse(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, AdapterError> {
        let response = self.http_client.get(self.endpoint(path)?).send().await?;
        let envelope: RpcEnvelope = response.json().await?;
        Self::unwrap_envelope(envelope)
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AdapterError> {
        let response = self
            .http_client
            .post(self.endpoint(path)?)
            .json(body)
            .send()
            .await?;
        let envelope: RpcEnvelope = response.json().await?;
        Self::unwrap_envelope(envelope)
    }
}

#[async_trait]
impl ChainAdapter for RpcAdapter {
    async fn initialize(&self) -> Result<(), AdapterError> {
        // Reading the chain height doubles as a connectivity probe.
        let _: BlockResponse = self.get("block").await?;
        Ok(())
    }

    async fn submit_spin(
        &self,
        bet_per_line: u64,
        paylines: u32,
        wallet: &str,
    ) -> Result<SubmitReceipt, AdapterError> {
        self.post(
            "spin",
            &SubmitRequest {
                bet_per_line,
                paylines,
                wallet,
            },
        )
        .await
    }

    async fn claim_spin(&self, bet_key: &str) -> Result<SpinOutcome, AdapterError> {
        self.post("claim", &ClaimRequest { bet_key }).await
    }

    async fn balance(&self, address: &str) -> Result<u64, AdapterError> {
        let response: BalanceResponse = self.get(&format!("balance/{address}")).await?;
        Ok(response.balance)
    }

    async fn current_block(&self) -> Result<u64, AdapterError> {
        let response: BlockResponse = self.get("block").await?;
        Ok(response.height)
    }

    async fn contract_config(&self) -> Result<SlotMachineConfig, AdapterError> {
        self.get("config").await
    }
}

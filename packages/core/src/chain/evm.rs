//! EVM chain adapter (Arbitrum, Ethereum). Polls a chain-data API for recent
//! ERC-20 transfers rather than subscribing to logs, matching SPEC_FULL.md
//! §4.2. Style grounded on `operator/src/confirmation/evm.rs`'s raw JSON-RPC
//! client shape (`serde_json::json!` bodies, `saturating_sub` confirmation math).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{PayhubError, Result};

use super::{chain_config, meets_amount_tolerance, token_contract, ChainAdapter, TransferQuery, TransferResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESULTS: u32 = 50;

#[derive(Debug, Deserialize)]
struct AlchemyTransfersResponse {
    result: Option<AlchemyTransfersResult>,
}

#[derive(Debug, Deserialize)]
struct AlchemyTransfersResult {
    transfers: Vec<AlchemyTransfer>,
}

#[derive(Debug, Deserialize)]
struct AlchemyTransfer {
    hash: String,
    #[serde(rename = "blockNum")]
    block_num: String,
    value: Option<f64>,
    metadata: Option<AlchemyMetadata>,
}

#[derive(Debug, Deserialize)]
struct AlchemyMetadata {
    #[serde(rename = "blockTimestamp")]
    block_timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlchemyBlockNumberResponse {
    result: Option<String>,
}

/// EVM transfer-discovery adapter, one instance per network.
pub struct EvmAdapter {
    network: crate::domain::Network,
    base_url: String,
    client: Client,
}

impl EvmAdapter {
    pub fn new(network: crate::domain::Network, api_key: &str) -> Result<Self> {
        if !network.is_evm() {
            return Err(PayhubError::Internal("EvmAdapter requires an EVM network".into()));
        }
        let host = match network {
            crate::domain::Network::Arbitrum => "arb-mainnet.g.alchemy.com",
            crate::domain::Network::Ethereum => "eth-mainnet.g.alchemy.com",
            crate::domain::Network::Tron => unreachable!(),
        };
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PayhubError::Internal(format!("building http client: {e}")))?;
        Ok(Self {
            network,
            base_url: format!("https://{host}/v2/{api_key}"),
            client,
        })
    }

    async fn get_block_number(&self) -> Result<u64> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_blockNumber",
            "params": [],
            "id": 1,
        });
        let response: AlchemyBlockNumberResponse = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PayhubError::Internal(format!("eth_blockNumber request: {e}")))?
            .json()
            .await
            .map_err(|e| PayhubError::Internal(format!("eth_blockNumber decode: {e}")))?;
        let hex = response
            .result
            .ok_or_else(|| PayhubError::Internal("no block number returned".into()))?;
        u64::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|e| PayhubError::Internal(format!("invalid block number hex: {e}")))
    }

    async fn get_asset_transfers(
        &self,
        from: &str,
        to: &str,
        contract: &str,
    ) -> Result<Vec<AlchemyTransfer>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "alchemy_getAssetTransfers",
            "params": [{
                "fromAddress": from,
                "toAddress": to,
                "contractAddresses": [contract],
                "category": ["erc20"],
                "order": "desc",
                "maxCount": format!("0x{:x}", MAX_RESULTS),
                "withMetadata": true,
            }],
            "id": 1,
        });
        let response: AlchemyTransfersResponse = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PayhubError::Internal(format!("alchemy_getAssetTransfers request: {e}")))?
            .json()
            .await
            .map_err(|e| PayhubError::Internal(format!("alchemy_getAssetTransfers decode: {e}")))?;
        Ok(response.result.map(|r| r.transfers).unwrap_or_default())
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    async fn find_transfer(&self, query: &TransferQuery<'_>) -> Result<TransferResult> {
        let contract = token_contract(self.network, query.token);
        let transfers = self
            .get_asset_transfers(query.sender_address, query.receiver_address, contract)
            .await?;

        let current_block = self.get_block_number().await?;
        let config = chain_config(self.network);

        for transfer in transfers {
            let timestamp = transfer
                .metadata
                .as_ref()
                .and_then(|m| m.block_timestamp.as_deref())
                .and_then(parse_rfc3339);

            // Discard transfers older than the payment itself (Open Question (b): inclusive).
            if let Some(ts) = timestamp {
                if ts < query.created_at {
                    continue;
                }
            }

            let value = match transfer.value {
                Some(v) => Decimal::try_from(v)
                    .map_err(|e| PayhubError::Internal(format!("invalid transfer value: {e}")))?,
                None => continue,
            };
            if !meets_amount_tolerance(value, query.required_amount) {
                continue;
            }

            let tx_block = u64::from_str_radix(transfer.block_num.trim_start_matches("0x"), 16)
                .map_err(|e| PayhubError::Internal(format!("invalid block number: {e}")))?;
            let confirmations = (current_block.saturating_sub(tx_block) + 1) as u32;
            if confirmations < config.min_confirmations {
                continue;
            }

            return Ok(TransferResult {
                found: true,
                tx_hash: Some(transfer.hash),
                confirmations: Some(confirmations),
                amount: Some(value),
                timestamp,
                block_number: Some(tx_block),
            });
        }

        Ok(TransferResult::not_found())
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| Utc.from_utc_datetime(&dt.naive_utc()))
}

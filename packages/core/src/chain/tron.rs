//! Tron chain adapter. Polls a TronGrid-style REST endpoint for recent TRC20
//! transfers to the receiver, then a transaction-info endpoint for block
//! height to compute confirmations. Style grounded on
//! `operator/src/watchers/terra.rs`'s REST-polling client shape.

use std::time::Duration;

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{PayhubError, Result};

use super::{chain_config, meets_amount_tolerance, token_contract, ChainAdapter, TransferQuery, TransferResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESULTS: u32 = 50;
const DEFAULT_BASE_URL: &str = "https://api.trongrid.io";

#[derive(Debug, Deserialize)]
struct Trc20TransfersResponse {
    data: Vec<Trc20Transfer>,
}

#[derive(Debug, Deserialize)]
struct Trc20Transfer {
    transaction_id: String,
    from: String,
    to: String,
    value: String,
    block_timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct NowBlockResponse {
    block_header: BlockHeader,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    raw_data: BlockHeaderRawData,
}

#[derive(Debug, Deserialize)]
struct BlockHeaderRawData {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct TransactionInfoResponse {
    #[serde(rename = "blockNumber")]
    block_number: Option<u64>,
}

pub struct TronAdapter {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl TronAdapter {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PayhubError::Internal(format!("building http client: {e}")))?;
        Ok(Self {
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
            client,
        })
    }

    fn request(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("TRON-PRO-API-KEY", key),
            None => req,
        }
    }

    async fn get_trc20_transfers(
        &self,
        receiver: &str,
        contract: &str,
        min_timestamp: i64,
    ) -> Result<Vec<Trc20Transfer>> {
        let url = format!("{}/v1/accounts/{}/transactions/trc20", self.base_url, receiver);
        let req = self.client.get(&url).query(&[
            ("only_to", "true"),
            ("contract_address", contract),
            ("min_timestamp", &min_timestamp.to_string()),
            ("limit", &MAX_RESULTS.to_string()),
            ("order_by", "block_timestamp,desc"),
        ]);
        let response: Trc20TransfersResponse = self
            .request(req)
            .send()
            .await
            .map_err(|e| PayhubError::Internal(format!("trc20 transfers request: {e}")))?
            .json()
            .await
            .map_err(|e| PayhubError::Internal(format!("trc20 transfers decode: {e}")))?;
        Ok(response.data)
    }

    async fn get_now_block(&self) -> Result<u64> {
        let url = format!("{}/wallet/getnowblock", self.base_url);
        let req = self.client.get(&url);
        let response: NowBlockResponse = self
            .request(req)
            .send()
            .await
            .map_err(|e| PayhubError::Internal(format!("getnowblock request: {e}")))?
            .json()
            .await
            .map_err(|e| PayhubError::Internal(format!("getnowblock decode: {e}")))?;
        Ok(response.block_header.raw_data.number)
    }

    async fn get_tx_block(&self, tx_hash: &str) -> Result<Option<u64>> {
        let url = format!("{}/wallet/gettransactioninfobyid", self.base_url);
        let req = self.client.get(&url).query(&[("value", tx_hash)]);
        let response: TransactionInfoResponse = self
            .request(req)
            .send()
            .await
            .map_err(|e| PayhubError::Internal(format!("gettransactioninfobyid request: {e}")))?
            .json()
            .await
            .map_err(|e| PayhubError::Internal(format!("gettransactioninfobyid decode: {e}")))?;
        Ok(response.block_number)
    }
}

#[async_trait]
impl ChainAdapter for TronAdapter {
    async fn find_transfer(&self, query: &TransferQuery<'_>) -> Result<TransferResult> {
        let contract = token_contract(crate::domain::Network::Tron, query.token);
        let min_timestamp = query.created_at.timestamp_millis();
        let transfers = self
            .get_trc20_transfers(query.receiver_address, contract, min_timestamp)
            .await?;

        let config = chain_config(crate::domain::Network::Tron);
        let sender_lower = query.sender_address.to_ascii_lowercase();

        for transfer in transfers {
            if transfer.from.to_ascii_lowercase() != sender_lower {
                continue;
            }

            let raw_value = Decimal::from_str(&transfer.value).unwrap_or(Decimal::ZERO);
            let scale = 10i64.pow(chain_config(crate::domain::Network::Tron).decimals);
            let value = raw_value / Decimal::new(scale, 0);
            if !meets_amount_tolerance(value, query.required_amount) {
                continue;
            }

            let tx_block = match self.get_tx_block(&transfer.transaction_id).await? {
                Some(b) => b,
                None => continue,
            };
            let current_block = self.get_now_block().await?;
            // Open Question (c): Tron confirmations omit the EVM +1.
            let confirmations = current_block.saturating_sub(tx_block) as u32;
            if confirmations < config.min_confirmations {
                continue;
            }

            let timestamp = Utc.timestamp_millis_opt(transfer.block_timestamp).single();

            return Ok(TransferResult {
                found: true,
                tx_hash: Some(transfer.transaction_id),
                confirmations: Some(confirmations),
                amount: Some(value),
                timestamp,
                block_number: Some(tx_block),
            });
        }

        Ok(TransferResult::not_found())
    }
}

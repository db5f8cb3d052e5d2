//! Chain adapters discover matching on-chain transfers for a payment and
//! report a confirmation depth. Both adapters implement [`ChainAdapter`] so
//! the monitor dispatches without per-chain branching beyond the enum match
//! used to pick which adapter to call.

pub mod evm;
pub mod tron;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::{Network, Token};

/// Static per-network/token chain configuration (contract addresses, decimals,
/// required confirmation depth, explorer base URL). See SPEC_FULL.md §4.2.
pub struct ChainConfig {
    pub network: Network,
    pub decimals: u32,
    pub min_confirmations: u32,
    pub explorer_tx_prefix: &'static str,
    pub block_time_seconds: u32,
    pub fee_hint: &'static str,
}

impl ChainConfig {
    /// Rough wall-clock time to reach `min_confirmations`, for display only;
    /// not used anywhere in the confirmation logic itself.
    pub fn estimated_confirmation_seconds(&self) -> u32 {
        self.min_confirmations * self.block_time_seconds
    }
}

pub fn chain_config(network: Network) -> ChainConfig {
    match network {
        Network::Arbitrum => ChainConfig {
            network,
            decimals: 6,
            min_confirmations: 3,
            explorer_tx_prefix: "https://arbiscan.io/tx/",
            block_time_seconds: 1,
            fee_hint: "low",
        },
        Network::Ethereum => ChainConfig {
            network,
            decimals: 6,
            min_confirmations: 3,
            explorer_tx_prefix: "https://etherscan.io/tx/",
            block_time_seconds: 12,
            fee_hint: "higher",
        },
        Network::Tron => ChainConfig {
            network,
            decimals: 6,
            min_confirmations: 19,
            explorer_tx_prefix: "https://tronscan.org/#/transaction/",
            block_time_seconds: 3,
            fee_hint: "very low",
        },
    }
}

pub fn token_contract(network: Network, token: Token) -> &'static str {
    match (network, token) {
        (Network::Arbitrum, Token::Usdt) => "0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9",
        (Network::Arbitrum, Token::Usdc) => "0xaf88d065e77c8cC2239327C5EDb3A432268e5831",
        (Network::Ethereum, Token::Usdt) => "0xdAC17F958D2ee523a2206206994597C13D831ec7",
        (Network::Ethereum, Token::Usdc) => "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
        (Network::Tron, Token::Usdt) => "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t",
        (Network::Tron, Token::Usdc) => "TEkxiTehnzSmSe2XqrBj4w32RUN966rdz8",
    }
}

/// `0.99 x required_amount`, tolerating the decimal-scale rounding introduced
/// by upstream chain-data APIs (Open Question (a), decided in DESIGN.md).
pub const AMOUNT_TOLERANCE_NUMER: i64 = 99;
pub const AMOUNT_TOLERANCE_DENOM: i64 = 100;

pub fn meets_amount_tolerance(observed: Decimal, required: Decimal) -> bool {
    let threshold = required * Decimal::new(AMOUNT_TOLERANCE_NUMER, 0)
        / Decimal::new(AMOUNT_TOLERANCE_DENOM, 0);
    observed >= threshold
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    pub found: bool,
    pub tx_hash: Option<String>,
    pub confirmations: Option<u32>,
    pub amount: Option<Decimal>,
    pub timestamp: Option<DateTime<Utc>>,
    pub block_number: Option<u64>,
}

impl TransferResult {
    pub fn not_found() -> Self {
        Self {
            found: false,
            tx_hash: None,
            confirmations: None,
            amount: None,
            timestamp: None,
            block_number: None,
        }
    }
}

/// Parameters an adapter needs to look for a transfer; deliberately narrower
/// than the full `Payment` row so adapters don't reach into storage directly.
pub struct TransferQuery<'a> {
    pub sender_address: &'a str,
    pub receiver_address: &'a str,
    pub token: Token,
    pub network: Network,
    pub required_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ChainAdapter: Send + Sync {
    async fn find_transfer(&self, query: &TransferQuery<'_>) -> crate::error::Result<TransferResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_tolerance_accepts_99_percent() {
        let required = Decimal::new(1000, 2); // 10.00
        let observed = Decimal::new(990, 2); // 9.90
        assert!(meets_amount_tolerance(observed, required));
    }

    #[test]
    fn amount_tolerance_rejects_below_threshold() {
        let required = Decimal::new(1000, 2);
        let observed = Decimal::new(989, 2); // 9.89
        assert!(!meets_amount_tolerance(observed, required));
    }

    #[test]
    fn tron_confirmations_are_deeper_than_evm() {
        assert!(chain_config(Network::Tron).min_confirmations > chain_config(Network::Ethereum).min_confirmations);
    }
}

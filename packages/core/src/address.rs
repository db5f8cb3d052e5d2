//! Per-network address format validation and normalization.

use crate::domain::Network;
use crate::error::{PayhubError, Result};

/// Validates and normalizes a sender address for the given network.
/// EVM addresses are normalized to lower-case hex; Tron addresses are
/// returned unchanged aside from whitespace trimming (base58 is case-sensitive).
pub fn validate_and_normalize(network: Network, address: &str) -> Result<String> {
    let trimmed = address.trim();
    match network {
        Network::Arbitrum | Network::Ethereum => validate_evm(trimmed),
        Network::Tron => validate_tron(trimmed),
    }
}

pub fn is_valid(network: Network, address: &str) -> bool {
    validate_and_normalize(network, address).is_ok()
}

fn validate_evm(address: &str) -> Result<String> {
    if address.len() != 42 || !address.starts_with("0x") {
        return Err(PayhubError::InvalidAddress(format!(
            "{address} is not a valid EVM address"
        )));
    }
    if !address[2..].bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(PayhubError::InvalidAddress(format!(
            "{address} is not a valid EVM address"
        )));
    }
    Ok(address.to_ascii_lowercase())
}

fn validate_tron(address: &str) -> Result<String> {
    if !address.starts_with('T') || address.len() != 34 {
        return Err(PayhubError::InvalidAddress(format!(
            "{address} is not a valid Tron address"
        )));
    }
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|_| PayhubError::InvalidAddress(format!("{address} is not valid base58")))?;
    // 1-byte prefix (0x41) + 20-byte address + 4-byte checksum
    if decoded.len() != 25 || decoded[0] != 0x41 {
        return Err(PayhubError::InvalidAddress(format!(
            "{address} is not a valid Tron address"
        )));
    }
    Ok(address.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_evm_address_normalizes_lowercase() {
        let addr = "0xAbCdEf0123456789aBcDeF0123456789aBCdEf01";
        let normalized = validate_and_normalize(Network::Ethereum, addr).unwrap();
        assert_eq!(normalized, addr.to_ascii_lowercase());
    }

    #[test]
    fn rejects_short_evm_address() {
        assert!(validate_and_normalize(Network::Arbitrum, "0x1234").is_err());
    }

    #[test]
    fn rejects_non_hex_evm_address() {
        let addr = "0xzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz";
        assert!(validate_and_normalize(Network::Ethereum, addr).is_err());
    }

    #[test]
    fn valid_tron_address() {
        // TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t is the well-known USDT contract address,
        // valid base58check with the Tron 0x41 version byte.
        let addr = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
        assert!(validate_and_normalize(Network::Tron, addr).is_ok());
    }

    #[test]
    fn rejects_non_tron_prefix() {
        assert!(validate_and_normalize(Network::Tron, "XR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t").is_err());
    }
}

//! AES-256-GCM address envelope, HMAC-SHA256 lookup digest, webhook signing.
//!
//! Key material is derived once per process from `SESSION_SECRET` via scrypt,
//! matching the `<iv_hex>:<auth_tag_hex>:<ciphertext_hex>` envelope format.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use scrypt::{scrypt, Params};
use sha2::Sha256;

use crate::error::{PayhubError, Result};

const SCRYPT_SALT: &[u8] = b"payment-salt";
const IV_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct CryptoContext {
    key: [u8; 32],
    hmac_key: Vec<u8>,
}

impl CryptoContext {
    /// Derives the AES key via scrypt and keeps the raw session secret as the
    /// HMAC key, mirroring the envelope scheme in SPEC_FULL.md §6.4.
    pub fn new(session_secret: &str) -> Result<Self> {
        let mut key = [0u8; 32];
        let params = Params::new(Params::RECOMMENDED_LOG_N, Params::RECOMMENDED_R, Params::RECOMMENDED_P, 32)
            .map_err(|e| PayhubError::Internal(format!("scrypt params: {e}")))?;
        scrypt(session_secret.as_bytes(), SCRYPT_SALT, &params, &mut key)
            .map_err(|e| PayhubError::Internal(format!("scrypt derive: {e}")))?;
        Ok(Self {
            key,
            hmac_key: session_secret.as_bytes().to_vec(),
        })
    }

    /// Encrypts a lower-cased address. IV is random per call.
    pub fn encrypt_address(&self, address: &str) -> Result<String> {
        let normalized = address.to_ascii_lowercase();
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let ciphertext_and_tag = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: normalized.as_bytes(),
                    aad: &[],
                },
            )
            .map_err(|_| PayhubError::Internal("address encryption failed".into()))?;

        let tag_start = ciphertext_and_tag.len() - 16;
        let (ciphertext, tag) = ciphertext_and_tag.split_at(tag_start);

        Ok(format!(
            "{}:{}:{}",
            hex::encode(iv),
            hex::encode(tag),
            hex::encode(ciphertext)
        ))
    }

    pub fn decrypt_address(&self, envelope: &str) -> Result<String> {
        let parts: Vec<&str> = envelope.split(':').collect();
        if parts.len() != 3 {
            return Err(PayhubError::Internal("malformed address envelope".into()));
        }
        let iv = hex::decode(parts[0])
            .map_err(|_| PayhubError::Internal("malformed envelope iv".into()))?;
        let tag = hex::decode(parts[1])
            .map_err(|_| PayhubError::Internal("malformed envelope tag".into()))?;
        let ciphertext = hex::decode(parts[2])
            .map_err(|_| PayhubError::Internal("malformed envelope ciphertext".into()))?;
        if iv.len() != IV_LEN || tag.len() != 16 {
            return Err(PayhubError::Internal("malformed envelope lengths".into()));
        }

        let mut combined = ciphertext;
        combined.extend_from_slice(&tag);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(&iv);

        let plaintext = cipher
            .decrypt(
                nonce,
                Payload {
                    msg: &combined,
                    aad: &[],
                },
            )
            .map_err(|_| PayhubError::Internal("address decryption failed".into()))?;

        String::from_utf8(plaintext).map_err(|_| PayhubError::Internal("decrypted address not utf8".into()))
    }

    /// Deterministic digest used as an indexed lookup key without decrypting.
    pub fn address_hmac(&self, address: &str) -> String {
        let normalized = address.to_ascii_lowercase();
        let mut mac = HmacSha256::new_from_slice(&self.hmac_key).expect("HMAC accepts any key length");
        mac.update(normalized.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Computes `X-Webhook-Signature`: `HMAC_SHA256(webhook_secret, payload)` hex.
pub fn sign_webhook_payload(webhook_secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(webhook_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Timing-safe comparison, for consumers verifying `X-Webhook-Signature`.
pub fn verify_webhook_signature(webhook_secret: &str, payload: &str, signature_hex: &str) -> bool {
    let expected = sign_webhook_payload(webhook_secret, payload);
    let expected_bytes = expected.as_bytes();
    let given_bytes = signature_hex.as_bytes();
    if expected_bytes.len() != given_bytes.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in expected_bytes.iter().zip(given_bytes.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let ctx = CryptoContext::new("test-session-secret").unwrap();
        let address = "0xAbC1230000000000000000000000000000dEaD";
        let envelope = ctx.encrypt_address(address).unwrap();
        assert_eq!(envelope.split(':').count(), 3);
        let decrypted = ctx.decrypt_address(&envelope).unwrap();
        assert_eq!(decrypted, address.to_ascii_lowercase());
    }

    #[test]
    fn hmac_is_stable_and_case_insensitive() {
        let ctx = CryptoContext::new("test-session-secret").unwrap();
        let a = ctx.address_hmac("0xABC");
        let b = ctx.address_hmac("0xabc");
        assert_eq!(a, b);
        assert_eq!(a, ctx.address_hmac("0xabc"));
    }

    #[test]
    fn webhook_signature_round_trip() {
        let payload = r#"{"event":"payment.confirmed"}"#;
        let sig = sign_webhook_payload("secret", payload);
        assert!(verify_webhook_signature("secret", payload, &sig));
        assert!(!verify_webhook_signature("wrong-secret", payload, &sig));
    }

    #[test]
    fn decrypt_rejects_malformed_envelope() {
        let ctx = CryptoContext::new("test-session-secret").unwrap();
        assert!(ctx.decrypt_address("not-an-envelope").is_err());
    }
}

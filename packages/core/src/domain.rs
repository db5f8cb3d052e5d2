//! Core entity types shared by the engines and the storage contract.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Supported settlement chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Arbitrum,
    Ethereum,
    Tron,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Arbitrum => "arbitrum",
            Network::Ethereum => "ethereum",
            Network::Tron => "tron",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "arbitrum" => Some(Network::Arbitrum),
            "ethereum" => Some(Network::Ethereum),
            "tron" => Some(Network::Tron),
            _ => None,
        }
    }

    pub fn is_evm(&self) -> bool {
        matches!(self, Network::Arbitrum | Network::Ethereum)
    }
}

/// Supported settlement tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "uppercase")]
pub enum Token {
    Usdt,
    Usdc,
}

impl Token {
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Usdt => "USDT",
            Token::Usdc => "USDC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "USDT" => Some(Token::Usdt),
            "USDC" => Some(Token::Usdc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    AwaitingConfirmation,
    Confirmed,
    Expired,
    Cancelled,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::AwaitingConfirmation => "awaiting_confirmation",
            PaymentStatus::Confirmed => "confirmed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Pending | PaymentStatus::AwaitingConfirmation
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub api_key_digest: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub evm_receiver_address: Option<String>,
    pub tron_receiver_address: Option<String>,
    pub active: bool,
}

impl Tenant {
    pub fn receiver_for(&self, network: Network) -> Option<&str> {
        match network {
            Network::Arbitrum | Network::Ethereum => self.evm_receiver_address.as_deref(),
            Network::Tron => self.tron_receiver_address.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub tenant_id: String,
    pub plan_key: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub currency: Token,
    pub period_days: Option<i64>,
    pub features: Vec<String>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct NewPlan {
    pub plan_key: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub currency: Token,
    pub period_days: Option<i64>,
    pub features: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub period_days: Option<Option<i64>>,
    pub features: Option<Vec<String>>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub tenant_id: String,
    pub external_user_id: String,
    pub plan_id: String,
    pub amount: Decimal,
    pub token: Token,
    pub network: Network,
    pub sender_address_encrypted: String,
    pub sender_address_hmac: String,
    pub receiver_address: String,
    pub status: PaymentStatus,
    pub tx_hash: Option<String>,
    pub confirmations: i32,
    pub tx_confirmed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub tenant_id: String,
    pub external_user_id: String,
    pub plan_id: String,
    pub amount: Decimal,
    pub token: Token,
    pub network: Network,
    pub sender_address_encrypted: String,
    pub sender_address_hmac: String,
    pub receiver_address: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub tenant_id: String,
    pub external_user_id: String,
    pub plan_id: String,
    pub payment_id: Option<String>,
    pub status: SubscriptionStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn days_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        self.ends_at.map(|ends| {
            let secs = (ends - now).num_seconds();
            (secs / 86_400).max(0)
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub tenant_id: String,
    pub external_user_id: String,
    pub plan_id: String,
    pub payment_id: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: String,
    pub tenant_id: String,
    pub event: String,
    pub payload: String,
    pub target_url: String,
    pub last_response_status: Option<i32>,
    pub last_response_body: Option<String>,
    pub success: bool,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookLog {
    pub tenant_id: String,
    pub event: String,
    pub payload: String,
    pub target_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfacSanctionedAddress {
    pub address: String,
    pub address_lower: String,
    pub address_type: String,
    pub sdn_name: String,
    pub sdn_id: Option<String>,
    pub source: String,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfacUpdateLog {
    pub id: String,
    pub total: i64,
    pub new_count: i64,
    pub removed_count: i64,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

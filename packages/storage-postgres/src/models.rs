//! Row-level mirrors of the core domain types. Status/network/token columns
//! are stored as `TEXT`; conversion back to the typed enums happens in
//! `TryFrom`, the same split the teacher's `db::models` keeps between a
//! `FromRow` read struct and the domain type it's shaped like.

use chrono::{DateTime, Utc};
use payhub_core::domain::{
    Network, OfacSanctionedAddress, OfacUpdateLog, Payment, PaymentStatus, Plan, Subscription,
    SubscriptionStatus, Tenant, Token, WebhookLog,
};
use payhub_core::error::PayhubError;
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::FromRow;

fn bad_enum(column: &str, value: &str) -> PayhubError {
    PayhubError::Internal(format!("unrecognized {column} value in storage row: {value}"))
}

#[derive(Debug, Clone, FromRow)]
pub struct TenantRow {
    pub id: String,
    pub name: String,
    pub api_key_digest: String,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub evm_receiver_address: Option<String>,
    pub tron_receiver_address: Option<String>,
    pub active: bool,
}

impl From<TenantRow> for Tenant {
    fn from(row: TenantRow) -> Self {
        Tenant {
            id: row.id,
            name: row.name,
            api_key_digest: row.api_key_digest,
            webhook_url: row.webhook_url,
            webhook_secret: row.webhook_secret,
            evm_receiver_address: row.evm_receiver_address,
            tron_receiver_address: row.tron_receiver_address,
            active: row.active,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PlanRow {
    pub id: String,
    pub tenant_id: String,
    pub plan_key: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub currency: String,
    pub period_days: Option<i64>,
    pub features: Json<Vec<String>>,
    pub active: bool,
}

impl TryFrom<PlanRow> for Plan {
    type Error = PayhubError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        Ok(Plan {
            id: row.id,
            tenant_id: row.tenant_id,
            plan_key: row.plan_key,
            name: row.name,
            description: row.description,
            price: row.price,
            currency: Token::parse(&row.currency).ok_or_else(|| bad_enum("currency", &row.currency))?,
            period_days: row.period_days,
            features: row.features.0,
            active: row.active,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PaymentRow {
    pub id: String,
    pub tenant_id: String,
    pub external_user_id: String,
    pub plan_id: String,
    pub amount: Decimal,
    pub token: String,
    pub network: String,
    pub sender_address_encrypted: String,
    pub sender_address_hmac: String,
    pub receiver_address: String,
    pub status: String,
    pub tx_hash: Option<String>,
    pub confirmations: i32,
    pub tx_confirmed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = PayhubError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: row.id,
            tenant_id: row.tenant_id,
            external_user_id: row.external_user_id,
            plan_id: row.plan_id,
            amount: row.amount,
            token: Token::parse(&row.token).ok_or_else(|| bad_enum("token", &row.token))?,
            network: Network::parse(&row.network).ok_or_else(|| bad_enum("network", &row.network))?,
            sender_address_encrypted: row.sender_address_encrypted,
            sender_address_hmac: row.sender_address_hmac,
            receiver_address: row.receiver_address,
            status: parse_payment_status(&row.status)?,
            tx_hash: row.tx_hash,
            confirmations: row.confirmations,
            tx_confirmed_at: row.tx_confirmed_at,
            error_message: row.error_message,
            retry_count: row.retry_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expires_at: row.expires_at,
        })
    }
}

pub fn parse_payment_status(s: &str) -> Result<PaymentStatus, PayhubError> {
    match s {
        "pending" => Ok(PaymentStatus::Pending),
        "awaiting_confirmation" => Ok(PaymentStatus::AwaitingConfirmation),
        "confirmed" => Ok(PaymentStatus::Confirmed),
        "expired" => Ok(PaymentStatus::Expired),
        "cancelled" => Ok(PaymentStatus::Cancelled),
        "failed" => Ok(PaymentStatus::Failed),
        other => Err(bad_enum("status", other)),
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionRow {
    pub id: String,
    pub tenant_id: String,
    pub external_user_id: String,
    pub plan_id: String,
    pub payment_id: Option<String>,
    pub status: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = PayhubError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = match row.status.as_str() {
            "active" => SubscriptionStatus::Active,
            "expired" => SubscriptionStatus::Expired,
            "cancelled" => SubscriptionStatus::Cancelled,
            other => return Err(bad_enum("status", other)),
        };
        Ok(Subscription {
            id: row.id,
            tenant_id: row.tenant_id,
            external_user_id: row.external_user_id,
            plan_id: row.plan_id,
            payment_id: row.payment_id,
            status,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WebhookLogRow {
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

impl From<WebhookLogRow> for WebhookLog {
    fn from(row: WebhookLogRow) -> Self {
        WebhookLog {
            id: row.id,
            tenant_id: row.tenant_id,
            event: row.event,
            payload: row.payload,
            target_url: row.target_url,
            last_response_status: row.last_response_status,
            last_response_body: row.last_response_body,
            success: row.success,
            retry_count: row.retry_count,
            next_retry_at: row.next_retry_at,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OfacAddressRow {
    pub address: String,
    pub address_lower: String,
    pub address_type: String,
    pub sdn_name: String,
    pub sdn_id: Option<String>,
    pub source: String,
    pub last_seen_at: DateTime<Utc>,
}

impl From<OfacAddressRow> for OfacSanctionedAddress {
    fn from(row: OfacAddressRow) -> Self {
        OfacSanctionedAddress {
            address: row.address,
            address_lower: row.address_lower,
            address_type: row.address_type,
            sdn_name: row.sdn_name,
            sdn_id: row.sdn_id,
            source: row.source,
            last_seen_at: row.last_seen_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OfacUpdateLogRow {
    pub id: String,
    pub total: i64,
    pub new_count: i64,
    pub removed_count: i64,
    pub success: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<OfacUpdateLogRow> for OfacUpdateLog {
    fn from(row: OfacUpdateLogRow) -> Self {
        OfacUpdateLog {
            id: row.id,
            total: row.total,
            new_count: row.new_count,
            removed_count: row.removed_count,
            success: row.success,
            error: row.error,
            created_at: row.created_at,
        }
    }
}

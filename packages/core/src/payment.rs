//! Payment state machine: creation, confirmation handoff, and the atomic
//! confirmation handler invoked by the monitor. Grounded in style on
//! `operator/src/db/mod.rs`'s approval lifecycle functions and
//! `operator/src/writers/mod.rs`'s guarded state transitions.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use crate::address;
use crate::chain::chain_config;
use crate::crypto::CryptoContext;
use crate::domain::{NewPayment, Network, Payment, PaymentStatus, Token};
use crate::error::{PayhubError, Result};
use crate::metrics::PAYMENTS_TOTAL;
use crate::monitor::Monitor;
use crate::ofac::OfacScreener;
use crate::storage::Storage;
use crate::subscription::SubscriptionEngine;
use crate::webhook::WebhookEngine;

pub const PAYMENT_LIFETIME_MINUTES: i64 = 30;
pub const MAX_MONITOR_RETRIES: i32 = 3;

pub struct Placement {
    pub payment_id: String,
    pub receiver_address: String,
    pub amount: Decimal,
    pub token: Token,
    pub network: Network,
    pub expires_at: DateTime<Utc>,
    pub expires_in_seconds: i64,
    pub qr_code_data: String,
}

pub struct PaymentStatusView {
    pub payment: Payment,
    pub seconds_to_expire: Option<i64>,
    pub explorer_url: Option<String>,
}

pub struct PaymentEngine {
    storage: Arc<dyn Storage>,
    crypto: CryptoContext,
    ofac: Arc<OfacScreener>,
    monitor: Arc<Monitor>,
    subscriptions: Arc<SubscriptionEngine>,
    webhooks: Arc<WebhookEngine>,
}

impl PaymentEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        crypto: CryptoContext,
        ofac: Arc<OfacScreener>,
        monitor: Arc<Monitor>,
        subscriptions: Arc<SubscriptionEngine>,
        webhooks: Arc<WebhookEngine>,
    ) -> Self {
        Self {
            storage,
            crypto,
            ofac,
            monitor,
            subscriptions,
            webhooks,
        }
    }

    pub async fn initiate_payment(
        &self,
        tenant_id: &str,
        external_user_id: &str,
        plan_id: &str,
        network: Network,
        sender_address: &str,
    ) -> Result<Placement> {
        let tenant = self
            .storage
            .get_tenant(tenant_id)
            .await?
            .filter(|t| t.active)
            .ok_or_else(|| PayhubError::NotFound(format!("tenant {tenant_id}")))?;

        let plan = self
            .storage
            .get_plan(tenant_id, plan_id)
            .await?
            .filter(|p| p.active)
            .ok_or_else(|| PayhubError::InvalidPlan(format!("plan {plan_id} not found or inactive")))?;

        let receiver_address = tenant
            .receiver_for(network)
            .ok_or_else(|| PayhubError::InvalidNetwork(format!("no receiver configured for {}", network.as_str())))?
            .to_string();

        let normalized_sender = address::validate_and_normalize(network, sender_address)?;

        let screen = self.ofac.check_address(&normalized_sender).await?;
        if screen.is_sanctioned {
            let sdn_name = screen
                .matches
                .first()
                .map(|m| m.sdn_name.clone())
                .unwrap_or_else(|| "unknown entity".to_string());
            warn!(address = %normalized_sender, %sdn_name, "blocked OFAC-sanctioned sender");
            return Err(PayhubError::OfacSanctioned {
                address: normalized_sender,
                sdn_name,
            });
        }

        if self
            .storage
            .pending_payment_for_user(tenant_id, external_user_id)
            .await?
            .is_some()
        {
            return Err(PayhubError::PendingExists);
        }

        let sender_address_encrypted = self.crypto.encrypt_address(&normalized_sender)?;
        let sender_address_hmac = self.crypto.address_hmac(&normalized_sender);

        let now = Utc::now();
        let expires_at = now + ChronoDuration::minutes(PAYMENT_LIFETIME_MINUTES);

        let payment = self
            .storage
            .create_payment(NewPayment {
                tenant_id: tenant_id.to_string(),
                external_user_id: external_user_id.to_string(),
                plan_id: plan.id.clone(),
                amount: plan.price,
                token: plan.currency,
                network,
                sender_address_encrypted,
                sender_address_hmac,
                receiver_address: receiver_address.clone(),
                expires_at,
            })
            .await?;

        info!(payment_id = %payment.id, %tenant_id, %external_user_id, "payment created");

        self.webhooks
            .enqueue(
                tenant_id,
                "payment.created",
                json!({
                    "payment_id": payment.id,
                    "external_user_id": payment.external_user_id,
                    "plan_id": payment.plan_id,
                    "amount": payment.amount.to_string(),
                    "token": payment.token.as_str(),
                    "network": payment.network.as_str(),
                    "status": payment.status.as_str(),
                    "expires_at": payment.expires_at,
                }),
            )
            .await;

        Ok(Placement {
            payment_id: payment.id,
            receiver_address,
            amount: payment.amount,
            token: payment.token,
            network: payment.network,
            expires_at,
            expires_in_seconds: (expires_at - now).num_seconds(),
            qr_code_data: payment.receiver_address,
        })
    }

    pub async fn confirm_payment_sent(&self, tenant_id: &str, payment_id: &str) -> Result<Payment> {
        let payment = self
            .storage
            .get_payment(tenant_id, payment_id)
            .await?
            .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;

        if payment.status != PaymentStatus::Pending {
            return Err(PayhubError::InvalidStatus(format!(
                "payment is {}, expected pending",
                payment.status.as_str()
            )));
        }

        if Utc::now() >= payment.expires_at {
            self.storage.mark_payment_expired(payment_id).await?;
            PAYMENTS_TOTAL.with_label_values(&["expired"]).inc();
            self.webhooks
                .enqueue(
                    tenant_id,
                    "payment.expired",
                    json!({"payment_id": payment_id, "external_user_id": payment.external_user_id}),
                )
                .await;
            return Err(PayhubError::InvalidStatus("payment has expired".into()));
        }

        let updated = self.storage.mark_awaiting_confirmation(tenant_id, payment_id).await?;
        self.monitor.enroll(payment_id.to_string(), updated.network).await;
        Ok(updated)
    }

    pub async fn get_payment_status(&self, tenant_id: &str, payment_id: &str) -> Result<PaymentStatusView> {
        let payment = self
            .storage
            .get_payment(tenant_id, payment_id)
            .await?
            .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;

        let seconds_to_expire = if payment.status.is_in_flight() {
            Some((payment.expires_at - Utc::now()).num_seconds().max(0))
        } else {
            None
        };

        let explorer_url = payment.tx_hash.as_ref().map(|tx| {
            format!("{}{}", chain_config(payment.network).explorer_tx_prefix, tx)
        });

        Ok(PaymentStatusView {
            payment,
            seconds_to_expire,
            explorer_url,
        })
    }

    pub async fn cancel_payment(&self, tenant_id: &str, payment_id: &str) -> Result<Payment> {
        let payment = self
            .storage
            .get_payment(tenant_id, payment_id)
            .await?
            .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;

        if payment.status != PaymentStatus::Pending {
            return Err(PayhubError::CannotCancel);
        }

        let cancelled = self.storage.mark_payment_cancelled(tenant_id, payment_id).await?;
        PAYMENTS_TOTAL.with_label_values(&["cancelled"]).inc();
        Ok(cancelled)
    }

    pub async fn get_payment_history(
        &self,
        tenant_id: &str,
        external_user_id: &str,
        limit: u32,
    ) -> Result<Vec<Payment>> {
        let limit = limit.min(50);
        self.storage.payment_history(tenant_id, external_user_id, limit).await
    }

    /// Invoked by the monitor on a confirmed transfer match. Atomic: either
    /// the payment becomes `confirmed` and the subscription activates, or
    /// neither happens (I2, I3).
    pub async fn handle_confirmed_transaction(
        &self,
        payment: &Payment,
        tx_hash: &str,
        confirmations: u32,
        observed_amount: Decimal,
    ) -> Result<()> {
        if let Some(existing) = self.storage.get_payment_by_tx_hash(tx_hash).await? {
            if existing.id != payment.id {
                return Err(PayhubError::Internal(format!(
                    "tx_hash {tx_hash} already claimed by payment {}",
                    existing.id
                )));
            }
        }

        let new_subscription = self
            .subscriptions
            .build_activation(&payment.tenant_id, &payment.external_user_id, &payment.plan_id, &payment.id)
            .await?;

        let (confirmed_payment, subscription) = self
            .storage
            .confirm_payment_and_activate_subscription(
                &payment.id,
                tx_hash,
                confirmations as i32,
                new_subscription,
            )
            .await?;

        PAYMENTS_TOTAL.with_label_values(&["confirmed"]).inc();
        info!(
            payment_id = %confirmed_payment.id,
            %tx_hash,
            confirmations,
            %observed_amount,
            "payment confirmed, subscription activated"
        );

        self.webhooks
            .enqueue(
                &confirmed_payment.tenant_id,
                "payment.confirmed",
                json!({
                    "payment_id": confirmed_payment.id,
                    "external_user_id": confirmed_payment.external_user_id,
                    "plan_id": confirmed_payment.plan_id,
                    "amount": confirmed_payment.amount.to_string(),
                    "token": confirmed_payment.token.as_str(),
                    "network": confirmed_payment.network.as_str(),
                    "tx_hash": tx_hash,
                    "confirmations": confirmations,
                    "confirmed_at": confirmed_payment.tx_confirmed_at,
                }),
            )
            .await;

        self.webhooks
            .enqueue(
                &confirmed_payment.tenant_id,
                "subscription.activated",
                json!({
                    "subscription_id": subscription.id,
                    "external_user_id": subscription.external_user_id,
                    "plan_id": subscription.plan_id,
                    "payment_id": subscription.payment_id,
                    "starts_at": subscription.starts_at,
                    "ends_at": subscription.ends_at,
                }),
            )
            .await;

        Ok(())
    }

    pub async fn mark_failed(&self, payment: &Payment, error_message: &str) -> Result<()> {
        self.storage.mark_payment_failed(&payment.id, error_message).await?;
        PAYMENTS_TOTAL.with_label_values(&["failed"]).inc();
        self.webhooks
            .enqueue(
                &payment.tenant_id,
                "payment.failed",
                json!({
                    "payment_id": payment.id,
                    "external_user_id": payment.external_user_id,
                    "plan_id": payment.plan_id,
                    "amount": payment.amount.to_string(),
                    "token": payment.token.as_str(),
                    "network": payment.network.as_str(),
                    "error": error_message,
                }),
            )
            .await;
        Ok(())
    }

    /// Decrypts a payment's sender address envelope for adapter use. Only
    /// the monitor's tick loop calls this; it never leaves the process.
    pub fn decrypt_sender_address(&self, payment: &Payment) -> Result<String> {
        self.crypto.decrypt_address(&payment.sender_address_encrypted)
    }

    pub async fn mark_expired(&self, payment: &Payment) -> Result<()> {
        self.storage.mark_payment_expired(&payment.id).await?;
        PAYMENTS_TOTAL.with_label_values(&["expired"]).inc();
        self.webhooks
            .enqueue(
                &payment.tenant_id,
                "payment.expired",
                json!({
                    "payment_id": payment.id,
                    "external_user_id": payment.external_user_id,
                    "plan_id": payment.plan_id,
                    "amount": payment.amount.to_string(),
                    "token": payment.token.as_str(),
                    "network": payment.network.as_str(),
                    "expires_at": payment.expires_at,
                }),
            )
            .await;
        Ok(())
    }
}

/// Sweeps pending payments past `expires_at` to `expired`. Invoked by the
/// scheduler every 5 minutes (SPEC_FULL.md §5).
pub async fn expire_due_payments(
    storage: &Arc<dyn Storage>,
    webhooks: &Arc<WebhookEngine>,
) -> Result<usize> {
    let now = Utc::now();
    let due = storage.expired_pending_payments(now).await?;
    let count = due.len();
    for payment in due {
        storage.mark_payment_expired(&payment.id).await?;
        PAYMENTS_TOTAL.with_label_values(&["expired"]).inc();
        webhooks
            .enqueue(
                &payment.tenant_id,
                "payment.expired",
                json!({
                    "payment_id": payment.id,
                    "external_user_id": payment.external_user_id,
                    "plan_id": payment.plan_id,
                    "amount": payment.amount.to_string(),
                    "token": payment.token.as_str(),
                    "network": payment.network.as_str(),
                    "expires_at": payment.expires_at,
                }),
            )
            .await;
    }
    Ok(count)
}

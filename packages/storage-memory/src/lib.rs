//! In-memory `Storage` implementation. Enforces the same uniqueness
//! invariants (I1 one in-flight payment per user, I2 unique confirmed
//! `tx_hash`, I6 one active subscription per user) a real driver would push
//! down to unique constraints. Used for tests and local dev.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use payhub_core::domain::{
    NewPayment, NewPlan, NewSubscription, NewWebhookLog, OfacSanctionedAddress, OfacUpdateLog,
    Payment, PaymentStatus, Plan, PlanUpdate, Subscription, SubscriptionStatus, Tenant, WebhookLog,
};
use payhub_core::error::{PayhubError, Result};
use payhub_core::storage::Storage;
use tokio::sync::RwLock;

fn new_id(counter: &AtomicU64, prefix: &str) -> String {
    let n = counter.fetch_add(1, Ordering::SeqCst);
    format!("{prefix}_{n:016x}")
}

#[derive(Default)]
struct State {
    tenants: HashMap<String, Tenant>,
    plans: HashMap<String, Plan>,
    payments: HashMap<String, Payment>,
    subscriptions: HashMap<String, Subscription>,
    webhook_logs: HashMap<String, WebhookLog>,
    ofac_addresses: Vec<OfacSanctionedAddress>,
    ofac_logs: Vec<OfacUpdateLog>,
}

pub struct MemoryStorage {
    state: RwLock<State>,
    plan_ids: AtomicU64,
    payment_ids: AtomicU64,
    subscription_ids: AtomicU64,
    webhook_ids: AtomicU64,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            plan_ids: AtomicU64::new(1),
            payment_ids: AtomicU64::new(1),
            subscription_ids: AtomicU64::new(1),
            webhook_ids: AtomicU64::new(1),
        }
    }

    /// Test/dev seam: register a tenant directly (no HTTP endpoint creates
    /// tenants; they're provisioned out of band per SPEC_FULL.md §6.3).
    pub async fn seed_tenant(&self, tenant: Tenant) {
        self.state.write().await.tenants.insert(tenant.id.clone(), tenant);
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        Ok(self.state.read().await.tenants.get(tenant_id).cloned())
    }

    async fn create_plan(&self, tenant_id: &str, plan: NewPlan) -> Result<Plan> {
        let mut state = self.state.write().await;
        let exists = state
            .plans
            .values()
            .any(|p| p.tenant_id == tenant_id && p.plan_key == plan.plan_key);
        if exists {
            return Err(PayhubError::Validation(format!(
                "plan_key {} already exists for tenant {tenant_id}",
                plan.plan_key
            )));
        }

        let id = new_id(&self.plan_ids, "plan");
        let record = Plan {
            id: id.clone(),
            tenant_id: tenant_id.to_string(),
            plan_key: plan.plan_key,
            name: plan.name,
            description: plan.description,
            price: plan.price,
            currency: plan.currency,
            period_days: plan.period_days,
            features: plan.features,
            active: true,
        };
        state.plans.insert(id, record.clone());
        Ok(record)
    }

    async fn get_plan(&self, tenant_id: &str, plan_id: &str) -> Result<Option<Plan>> {
        Ok(self
            .state
            .read()
            .await
            .plans
            .get(plan_id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_plan_by_key(&self, tenant_id: &str, plan_key: &str) -> Result<Option<Plan>> {
        Ok(self
            .state
            .read()
            .await
            .plans
            .values()
            .find(|p| p.tenant_id == tenant_id && p.plan_key == plan_key)
            .cloned())
    }

    async fn list_active_plans(&self, tenant_id: &str) -> Result<Vec<Plan>> {
        Ok(self
            .state
            .read()
            .await
            .plans
            .values()
            .filter(|p| p.tenant_id == tenant_id && p.active)
            .cloned()
            .collect())
    }

    async fn update_plan(&self, tenant_id: &str, plan_id: &str, update: PlanUpdate) -> Result<Plan> {
        let mut state = self.state.write().await;
        let plan = state
            .plans
            .get_mut(plan_id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or_else(|| PayhubError::NotFound(format!("plan {plan_id}")))?;

        if let Some(name) = update.name {
            plan.name = name;
        }
        if let Some(description) = update.description {
            plan.description = Some(description);
        }
        if let Some(price) = update.price {
            plan.price = price;
        }
        if let Some(period_days) = update.period_days {
            plan.period_days = period_days;
        }
        if let Some(features) = update.features {
            plan.features = features;
        }
        if let Some(active) = update.active {
            plan.active = active;
        }
        Ok(plan.clone())
    }

    async fn create_payment(&self, payment: NewPayment) -> Result<Payment> {
        let mut state = self.state.write().await;
        let id = new_id(&self.payment_ids, "pay");
        let now = Utc::now();
        let record = Payment {
            id: id.clone(),
            tenant_id: payment.tenant_id,
            external_user_id: payment.external_user_id,
            plan_id: payment.plan_id,
            amount: payment.amount,
            token: payment.token,
            network: payment.network,
            sender_address_encrypted: payment.sender_address_encrypted,
            sender_address_hmac: payment.sender_address_hmac,
            receiver_address: payment.receiver_address,
            status: PaymentStatus::Pending,
            tx_hash: None,
            confirmations: 0,
            tx_confirmed_at: None,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            expires_at: payment.expires_at,
        };
        state.payments.insert(id, record.clone());
        Ok(record)
    }

    async fn get_payment(&self, tenant_id: &str, payment_id: &str) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .get(payment_id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_payment_by_id_any_tenant(&self, payment_id: &str) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(payment_id).cloned())
    }

    async fn get_payment_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|p| p.tx_hash.as_deref() == Some(tx_hash))
            .cloned())
    }

    async fn pending_payment_for_user(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .find(|p| {
                p.tenant_id == tenant_id
                    && p.external_user_id == external_user_id
                    && p.status.is_in_flight()
            })
            .cloned())
    }

    async fn payment_history(
        &self,
        tenant_id: &str,
        external_user_id: &str,
        limit: u32,
    ) -> Result<Vec<Payment>> {
        let state = self.state.read().await;
        let mut matching: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.tenant_id == tenant_id && p.external_user_id == external_user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn awaiting_confirmation_payments(&self) -> Result<Vec<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::AwaitingConfirmation)
            .cloned()
            .collect())
    }

    async fn expired_pending_payments(&self, now: DateTime<Utc>) -> Result<Vec<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.status.is_in_flight() && p.expires_at <= now)
            .cloned()
            .collect())
    }

    async fn mark_awaiting_confirmation(&self, tenant_id: &str, payment_id: &str) -> Result<Payment> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(payment_id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;
        if payment.status != PaymentStatus::Pending {
            return Err(PayhubError::InvalidStatus(format!(
                "payment is {}, expected pending",
                payment.status.as_str()
            )));
        }
        payment.status = PaymentStatus::AwaitingConfirmation;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn mark_payment_expired(&self, payment_id: &str) -> Result<Payment> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;
        payment.status = PaymentStatus::Expired;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn mark_payment_cancelled(&self, tenant_id: &str, payment_id: &str) -> Result<Payment> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(payment_id)
            .filter(|p| p.tenant_id == tenant_id)
            .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;
        if payment.status != PaymentStatus::Pending {
            return Err(PayhubError::CannotCancel);
        }
        payment.status = PaymentStatus::Cancelled;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn mark_payment_failed(&self, payment_id: &str, error_message: &str) -> Result<Payment> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;
        payment.status = PaymentStatus::Failed;
        payment.error_message = Some(error_message.to_string());
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn increment_payment_retry(&self, payment_id: &str) -> Result<Payment> {
        let mut state = self.state.write().await;
        let payment = state
            .payments
            .get_mut(payment_id)
            .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;
        payment.retry_count += 1;
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn confirm_payment_and_activate_subscription(
        &self,
        payment_id: &str,
        tx_hash: &str,
        confirmations: i32,
        new_subscription: NewSubscription,
    ) -> Result<(Payment, Subscription)> {
        let mut state = self.state.write().await;

        let duplicate = state
            .payments
            .values()
            .any(|p| p.id != payment_id && p.tx_hash.as_deref() == Some(tx_hash));
        if duplicate {
            return Err(PayhubError::Internal(format!(
                "tx_hash {tx_hash} already claimed by another confirmed payment"
            )));
        }

        {
            let payment = state
                .payments
                .get(payment_id)
                .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;
            if payment.status != PaymentStatus::AwaitingConfirmation {
                return Err(PayhubError::InvalidStatus(format!(
                    "payment is {}, expected awaiting_confirmation",
                    payment.status.as_str()
                )));
            }
        }

        // I6: supersede any currently active subscription for this user.
        let tenant_id = new_subscription.tenant_id.clone();
        let external_user_id = new_subscription.external_user_id.clone();
        let superseded_id = state
            .subscriptions
            .values()
            .find(|s| {
                s.tenant_id == tenant_id
                    && s.external_user_id == external_user_id
                    && s.status == SubscriptionStatus::Active
            })
            .map(|s| s.id.clone());
        if let Some(id) = superseded_id {
            if let Some(sub) = state.subscriptions.get_mut(&id) {
                sub.status = SubscriptionStatus::Expired;
            }
        }

        let subscription_id = new_id(&self.subscription_ids, "sub");
        let subscription = Subscription {
            id: subscription_id.clone(),
            tenant_id: new_subscription.tenant_id,
            external_user_id: new_subscription.external_user_id,
            plan_id: new_subscription.plan_id,
            payment_id: new_subscription.payment_id,
            status: SubscriptionStatus::Active,
            starts_at: new_subscription.starts_at,
            ends_at: new_subscription.ends_at,
        };
        state.subscriptions.insert(subscription_id, subscription.clone());

        let payment = state
            .payments
            .get_mut(payment_id)
            .expect("payment existence already checked above");
        payment.status = PaymentStatus::Confirmed;
        payment.tx_hash = Some(tx_hash.to_string());
        payment.confirmations = confirmations;
        payment.tx_confirmed_at = Some(Utc::now());
        payment.updated_at = Utc::now();

        Ok((payment.clone(), subscription))
    }

    async fn active_subscription(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Option<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .values()
            .find(|s| {
                s.tenant_id == tenant_id
                    && s.external_user_id == external_user_id
                    && s.status == SubscriptionStatus::Active
            })
            .cloned())
    }

    async fn subscription_history(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Vec<Subscription>> {
        let state = self.state.read().await;
        let mut matching: Vec<Subscription> = state
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.external_user_id == external_user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.starts_at.cmp(&a.starts_at));
        Ok(matching)
    }

    async fn expired_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .values()
            .filter(|s| {
                s.status == SubscriptionStatus::Active
                    && s.ends_at.map(|ends| ends <= now).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn mark_subscription_expired(&self, subscription_id: &str) -> Result<Subscription> {
        let mut state = self.state.write().await;
        let subscription = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| PayhubError::NotFound(format!("subscription {subscription_id}")))?;
        subscription.status = SubscriptionStatus::Expired;
        Ok(subscription.clone())
    }

    async fn create_webhook_log(&self, log: NewWebhookLog) -> Result<WebhookLog> {
        let mut state = self.state.write().await;
        let id = new_id(&self.webhook_ids, "whl");
        let record = WebhookLog {
            id: id.clone(),
            tenant_id: log.tenant_id,
            event: log.event,
            payload: log.payload,
            target_url: log.target_url,
            last_response_status: None,
            last_response_body: None,
            success: false,
            retry_count: 0,
            next_retry_at: None,
            created_at: Utc::now(),
        };
        state.webhook_logs.insert(id, record.clone());
        Ok(record)
    }

    async fn record_webhook_delivery_success(
        &self,
        log_id: &str,
        response_status: i32,
        response_body: Option<String>,
    ) -> Result<WebhookLog> {
        let mut state = self.state.write().await;
        let log = state
            .webhook_logs
            .get_mut(log_id)
            .ok_or_else(|| PayhubError::NotFound(format!("webhook log {log_id}")))?;
        log.success = true;
        log.last_response_status = Some(response_status);
        log.last_response_body = response_body;
        log.next_retry_at = None;
        Ok(log.clone())
    }

    async fn record_webhook_delivery_failure(
        &self,
        log_id: &str,
        response_status: Option<i32>,
        response_body: Option<String>,
        retry_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<WebhookLog> {
        let mut state = self.state.write().await;
        let log = state
            .webhook_logs
            .get_mut(log_id)
            .ok_or_else(|| PayhubError::NotFound(format!("webhook log {log_id}")))?;
        log.last_response_status = response_status;
        log.last_response_body = response_body;
        log.retry_count = retry_count;
        log.next_retry_at = next_retry_at;
        Ok(log.clone())
    }

    async fn pending_webhooks(&self, now: DateTime<Utc>, max_retries: i32) -> Result<Vec<WebhookLog>> {
        Ok(self
            .state
            .read()
            .await
            .webhook_logs
            .values()
            .filter(|l| {
                !l.success
                    && l.retry_count < max_retries
                    && l.next_retry_at.map(|t| t <= now).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn replace_ofac_addresses(
        &self,
        addresses: Vec<OfacSanctionedAddress>,
    ) -> Result<(i64, i64)> {
        let mut state = self.state.write().await;
        let old_count = state.ofac_addresses.len() as i64;
        let new_count = addresses.len() as i64;
        state.ofac_addresses = addresses;
        Ok((old_count, new_count))
    }

    async fn check_ofac_address(&self, address_lower: &str) -> Result<Vec<OfacSanctionedAddress>> {
        Ok(self
            .state
            .read()
            .await
            .ofac_addresses
            .iter()
            .filter(|a| a.address_lower == address_lower)
            .cloned()
            .collect())
    }

    async fn ofac_address_count(&self) -> Result<i64> {
        Ok(self.state.read().await.ofac_addresses.len() as i64)
    }

    async fn ofac_address_type_counts(&self) -> Result<Vec<(String, i64)>> {
        let state = self.state.read().await;
        let mut counts: HashMap<String, i64> = HashMap::new();
        for addr in &state.ofac_addresses {
            *counts.entry(addr.address_type.clone()).or_insert(0) += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn append_ofac_update_log(&self, log: OfacUpdateLog) -> Result<()> {
        self.state.write().await.ofac_logs.push(log);
        Ok(())
    }

    async fn last_ofac_update_log(&self) -> Result<Option<OfacUpdateLog>> {
        Ok(self.state.read().await.ofac_logs.last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use payhub_core::domain::Token;

    fn tenant() -> Tenant {
        Tenant {
            id: "t1".into(),
            name: "Test Tenant".into(),
            api_key_digest: "digest".into(),
            webhook_url: None,
            webhook_secret: None,
            evm_receiver_address: Some("0x1111111111111111111111111111111111111111".into()),
            tron_receiver_address: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn duplicate_plan_key_rejected() {
        let storage = MemoryStorage::new();
        storage.seed_tenant(tenant()).await;
        let new_plan = NewPlan {
            plan_key: "pro".into(),
            name: "Pro".into(),
            description: None,
            price: rust_decimal::Decimal::new(1000, 2),
            currency: Token::Usdt,
            period_days: Some(30),
            features: vec![],
        };
        storage.create_plan("t1", new_plan.clone()).await.unwrap();
        assert!(storage.create_plan("t1", new_plan).await.is_err());
    }

    #[tokio::test]
    async fn duplicate_tx_hash_rejected() {
        let storage = MemoryStorage::new();
        let payment_a = storage
            .create_payment(NewPayment {
                tenant_id: "t1".into(),
                external_user_id: "u1".into(),
                plan_id: "p1".into(),
                amount: rust_decimal::Decimal::new(1000, 2),
                token: Token::Usdt,
                network: payhub_core::domain::Network::Ethereum,
                sender_address_encrypted: "enc".into(),
                sender_address_hmac: "hmac-a".into(),
                receiver_address: "0x1111111111111111111111111111111111111111".into(),
                expires_at: Utc::now() + chrono::Duration::minutes(30),
            })
            .await
            .unwrap();
        storage.mark_awaiting_confirmation("t1", &payment_a.id).await.unwrap();

        let payment_b = storage
            .create_payment(NewPayment {
                tenant_id: "t1".into(),
                external_user_id: "u2".into(),
                plan_id: "p1".into(),
                amount: rust_decimal::Decimal::new(1000, 2),
                token: Token::Usdt,
                network: payhub_core::domain::Network::Ethereum,
                sender_address_encrypted: "enc2".into(),
                sender_address_hmac: "hmac-b".into(),
                receiver_address: "0x1111111111111111111111111111111111111111".into(),
                expires_at: Utc::now() + chrono::Duration::minutes(30),
            })
            .await
            .unwrap();
        storage.mark_awaiting_confirmation("t1", &payment_b.id).await.unwrap();

        let sub = NewSubscription {
            tenant_id: "t1".into(),
            external_user_id: "u1".into(),
            plan_id: "p1".into(),
            payment_id: Some(payment_a.id.clone()),
            starts_at: Utc::now(),
            ends_at: None,
        };
        storage
            .confirm_payment_and_activate_subscription(&payment_a.id, "0xTX1", 3, sub)
            .await
            .unwrap();

        let sub_b = NewSubscription {
            tenant_id: "t1".into(),
            external_user_id: "u2".into(),
            plan_id: "p1".into(),
            payment_id: Some(payment_b.id.clone()),
            starts_at: Utc::now(),
            ends_at: None,
        };
        let result = storage
            .confirm_payment_and_activate_subscription(&payment_b.id, "0xTX1", 3, sub_b)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn activating_subscription_supersedes_previous_active_one() {
        let storage = MemoryStorage::new();
        let payment = storage
            .create_payment(NewPayment {
                tenant_id: "t1".into(),
                external_user_id: "u1".into(),
                plan_id: "p1".into(),
                amount: rust_decimal::Decimal::new(1000, 2),
                token: Token::Usdt,
                network: payhub_core::domain::Network::Ethereum,
                sender_address_encrypted: "enc".into(),
                sender_address_hmac: "hmac".into(),
                receiver_address: "0x1111111111111111111111111111111111111111".into(),
                expires_at: Utc::now() + chrono::Duration::minutes(30),
            })
            .await
            .unwrap();
        storage.mark_awaiting_confirmation("t1", &payment.id).await.unwrap();

        let (_, first_sub) = storage
            .confirm_payment_and_activate_subscription(
                &payment.id,
                "0xTX-first",
                3,
                NewSubscription {
                    tenant_id: "t1".into(),
                    external_user_id: "u1".into(),
                    plan_id: "p1".into(),
                    payment_id: Some(payment.id.clone()),
                    starts_at: Utc::now(),
                    ends_at: None,
                },
            )
            .await
            .unwrap();

        let payment2 = storage
            .create_payment(NewPayment {
                tenant_id: "t1".into(),
                external_user_id: "u1".into(),
                plan_id: "p1".into(),
                amount: rust_decimal::Decimal::new(1000, 2),
                token: Token::Usdt,
                network: payhub_core::domain::Network::Ethereum,
                sender_address_encrypted: "enc".into(),
                sender_address_hmac: "hmac".into(),
                receiver_address: "0x1111111111111111111111111111111111111111".into(),
                expires_at: Utc::now() + chrono::Duration::minutes(30),
            })
            .await
            .unwrap();
        storage.mark_awaiting_confirmation("t1", &payment2.id).await.unwrap();

        storage
            .confirm_payment_and_activate_subscription(
                &payment2.id,
                "0xTX-second",
                3,
                NewSubscription {
                    tenant_id: "t1".into(),
                    external_user_id: "u1".into(),
                    plan_id: "p1".into(),
                    payment_id: Some(payment2.id.clone()),
                    starts_at: Utc::now(),
                    ends_at: None,
                },
            )
            .await
            .unwrap();

        let active = storage.active_subscription("t1", "u1").await.unwrap().unwrap();
        assert_ne!(active.id, first_sub.id);

        let history = storage.subscription_history("t1", "u1").await.unwrap();
        assert_eq!(history.len(), 2);
    }
}

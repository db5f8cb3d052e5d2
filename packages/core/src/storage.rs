//! The core's only persistence dependency. Concrete drivers (`payhub-storage-memory`,
//! `payhub-storage-postgres`) implement this trait; the engines never touch SQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    NewPayment, NewPlan, NewSubscription, NewWebhookLog, OfacSanctionedAddress, OfacUpdateLog,
    Payment, Plan, PlanUpdate, Subscription, Tenant, WebhookLog,
};
use crate::error::Result;

#[async_trait]
pub trait Storage: Send + Sync {
    // Tenants
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    // Plans
    async fn create_plan(&self, tenant_id: &str, plan: NewPlan) -> Result<Plan>;
    async fn get_plan(&self, tenant_id: &str, plan_id: &str) -> Result<Option<Plan>>;
    async fn get_plan_by_key(&self, tenant_id: &str, plan_key: &str) -> Result<Option<Plan>>;
    async fn list_active_plans(&self, tenant_id: &str) -> Result<Vec<Plan>>;
    async fn update_plan(&self, tenant_id: &str, plan_id: &str, update: PlanUpdate) -> Result<Plan>;

    // Payments
    async fn create_payment(&self, payment: NewPayment) -> Result<Payment>;
    async fn get_payment(&self, tenant_id: &str, payment_id: &str) -> Result<Option<Payment>>;
    /// Tenant-agnostic lookup used by the monitor, which tracks payments by
    /// id only (the enrollment map is not tenant-scoped).
    async fn get_payment_by_id_any_tenant(&self, payment_id: &str) -> Result<Option<Payment>>;
    async fn get_payment_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Payment>>;
    async fn pending_payment_for_user(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Option<Payment>>;
    async fn payment_history(
        &self,
        tenant_id: &str,
        external_user_id: &str,
        limit: u32,
    ) -> Result<Vec<Payment>>;
    async fn awaiting_confirmation_payments(&self) -> Result<Vec<Payment>>;
    async fn expired_pending_payments(&self, now: DateTime<Utc>) -> Result<Vec<Payment>>;

    /// Transitions `pending -> awaiting_confirmation`. Fails if the payment is
    /// not currently `pending` (caller should treat the failure as INVALID_STATUS).
    async fn mark_awaiting_confirmation(&self, tenant_id: &str, payment_id: &str) -> Result<Payment>;
    async fn mark_payment_expired(&self, payment_id: &str) -> Result<Payment>;
    async fn mark_payment_cancelled(&self, tenant_id: &str, payment_id: &str) -> Result<Payment>;
    async fn mark_payment_failed(&self, payment_id: &str, error_message: &str) -> Result<Payment>;
    async fn increment_payment_retry(&self, payment_id: &str) -> Result<Payment>;

    /// Atomically transitions a payment to `confirmed` and activates the
    /// resulting subscription. Must reject on duplicate `tx_hash` (I2) and on
    /// a payment no longer in `awaiting_confirmation` (I3), leaving no partial
    /// state change in either case.
    async fn confirm_payment_and_activate_subscription(
        &self,
        payment_id: &str,
        tx_hash: &str,
        confirmations: i32,
        new_subscription: NewSubscription,
    ) -> Result<(Payment, Subscription)>;

    // Subscriptions
    async fn active_subscription(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Option<Subscription>>;
    async fn subscription_history(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Vec<Subscription>>;
    async fn expired_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>>;
    async fn mark_subscription_expired(&self, subscription_id: &str) -> Result<Subscription>;

    // Webhooks
    async fn create_webhook_log(&self, log: NewWebhookLog) -> Result<WebhookLog>;
    async fn record_webhook_delivery_success(
        &self,
        log_id: &str,
        response_status: i32,
        response_body: Option<String>,
    ) -> Result<WebhookLog>;
    async fn record_webhook_delivery_failure(
        &self,
        log_id: &str,
        response_status: Option<i32>,
        response_body: Option<String>,
        retry_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<WebhookLog>;
    async fn pending_webhooks(&self, now: DateTime<Utc>, max_retries: i32) -> Result<Vec<WebhookLog>>;

    // OFAC
    async fn replace_ofac_addresses(
        &self,
        addresses: Vec<OfacSanctionedAddress>,
    ) -> Result<(i64, i64)>; // (old_count, new_count)
    async fn check_ofac_address(&self, address_lower: &str) -> Result<Vec<OfacSanctionedAddress>>;
    async fn ofac_address_count(&self) -> Result<i64>;
    async fn ofac_address_type_counts(&self) -> Result<Vec<(String, i64)>>;
    async fn append_ofac_update_log(&self, log: OfacUpdateLog) -> Result<()>;
    async fn last_ofac_update_log(&self) -> Result<Option<OfacUpdateLog>>;
}

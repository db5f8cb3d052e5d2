//! Postgres `Storage` driver. Grounded on `operator/src/db/mod.rs`'s plain
//! `sqlx::query`/`query_as` style (no compile-time `query!` macro, since that
//! needs a live database at build time) and `operator/src/db/models.rs`'s
//! split between a `FromRow` read struct and the domain type it maps to.

mod models;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::{Result as EyreResult, WrapErr};
use payhub_core::domain::{
    NewPayment, NewPlan, NewSubscription, NewWebhookLog, OfacSanctionedAddress, OfacUpdateLog,
    Payment, Plan, PlanUpdate, Subscription, Tenant, WebhookLog,
};
use payhub_core::error::{PayhubError, Result};
use payhub_core::storage::Storage;
use rand::RngCore;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use tracing::error;

use models::{OfacAddressRow, OfacUpdateLogRow, PaymentRow, PlanRow, SubscriptionRow, TenantRow, WebhookLogRow};

pub async fn create_pool(database_url: &str) -> EyreResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("failed to connect to database")
}

pub async fn run_migrations(pool: &PgPool) -> EyreResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("failed to run database migrations")?;
    Ok(())
}

fn new_id(prefix: &str) -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}_{}", hex::encode(bytes))
}

fn db_err(e: sqlx::Error) -> PayhubError {
    error!(error = %e, "storage error");
    PayhubError::Internal(e.to_string())
}

fn constraint_name(e: &sqlx::Error) -> Option<&str> {
    e.as_database_error().and_then(|de| de.constraint())
}

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            r#"SELECT id, name, api_key_digest, webhook_url, webhook_secret,
                      evm_receiver_address, tron_receiver_address, active
               FROM tenants WHERE id = $1"#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Tenant::from))
    }

    async fn create_plan(&self, tenant_id: &str, plan: NewPlan) -> Result<Plan> {
        let id = new_id("plan");
        let row = sqlx::query_as::<_, PlanRow>(
            r#"INSERT INTO plans (id, tenant_id, plan_key, name, description, price, currency, period_days, features, active)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE)
               RETURNING id, tenant_id, plan_key, name, description, price, currency, period_days, features, active"#,
        )
        .bind(&id)
        .bind(tenant_id)
        .bind(&plan.plan_key)
        .bind(&plan.name)
        .bind(&plan.description)
        .bind(plan.price)
        .bind(plan.currency.as_str())
        .bind(plan.period_days)
        .bind(Json(&plan.features))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if constraint_name(&e) == Some("plans_tenant_id_plan_key_key") {
                PayhubError::Validation(format!(
                    "plan_key {} already exists for tenant {tenant_id}",
                    plan.plan_key
                ))
            } else {
                db_err(e)
            }
        })?;

        row.try_into()
    }

    async fn get_plan(&self, tenant_id: &str, plan_id: &str) -> Result<Option<Plan>> {
        let row = sqlx::query_as::<_, PlanRow>(
            r#"SELECT id, tenant_id, plan_key, name, description, price, currency, period_days, features, active
               FROM plans WHERE id = $1 AND tenant_id = $2"#,
        )
        .bind(plan_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_plan_by_key(&self, tenant_id: &str, plan_key: &str) -> Result<Option<Plan>> {
        let row = sqlx::query_as::<_, PlanRow>(
            r#"SELECT id, tenant_id, plan_key, name, description, price, currency, period_days, features, active
               FROM plans WHERE tenant_id = $1 AND plan_key = $2"#,
        )
        .bind(tenant_id)
        .bind(plan_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_active_plans(&self, tenant_id: &str) -> Result<Vec<Plan>> {
        let rows = sqlx::query_as::<_, PlanRow>(
            r#"SELECT id, tenant_id, plan_key, name, description, price, currency, period_days, features, active
               FROM plans WHERE tenant_id = $1 AND active = TRUE ORDER BY plan_key"#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_plan(&self, tenant_id: &str, plan_id: &str, update: PlanUpdate) -> Result<Plan> {
        let current = self
            .get_plan(tenant_id, plan_id)
            .await?
            .ok_or_else(|| PayhubError::NotFound(format!("plan {plan_id}")))?;

        let name = update.name.unwrap_or(current.name);
        let description = update.description.or(current.description);
        let price = update.price.unwrap_or(current.price);
        let period_days = match update.period_days {
            Some(inner) => inner,
            None => current.period_days,
        };
        let features = update.features.unwrap_or(current.features);
        let active = update.active.unwrap_or(current.active);

        let row = sqlx::query_as::<_, PlanRow>(
            r#"UPDATE plans SET name = $1, description = $2, price = $3, period_days = $4, features = $5, active = $6
               WHERE id = $7 AND tenant_id = $8
               RETURNING id, tenant_id, plan_key, name, description, price, currency, period_days, features, active"#,
        )
        .bind(&name)
        .bind(&description)
        .bind(price)
        .bind(period_days)
        .bind(Json(&features))
        .bind(active)
        .bind(plan_id)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.try_into()
    }

    async fn create_payment(&self, payment: NewPayment) -> Result<Payment> {
        let id = new_id("pay");
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"INSERT INTO payments (id, tenant_id, external_user_id, plan_id, amount, token, network,
                    sender_address_encrypted, sender_address_hmac, receiver_address, status, expires_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11)
               RETURNING id, tenant_id, external_user_id, plan_id, amount, token, network,
                    sender_address_encrypted, sender_address_hmac, receiver_address, status,
                    tx_hash, confirmations, tx_confirmed_at, error_message, retry_count,
                    created_at, updated_at, expires_at"#,
        )
        .bind(&id)
        .bind(&payment.tenant_id)
        .bind(&payment.external_user_id)
        .bind(&payment.plan_id)
        .bind(payment.amount)
        .bind(payment.token.as_str())
        .bind(payment.network.as_str())
        .bind(&payment.sender_address_encrypted)
        .bind(&payment.sender_address_hmac)
        .bind(&payment.receiver_address)
        .bind(payment.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if constraint_name(&e) == Some("payments_one_in_flight_per_user") {
                PayhubError::PendingExists
            } else {
                db_err(e)
            }
        })?;

        row.try_into()
    }

    async fn get_payment(&self, tenant_id: &str, payment_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(PAYMENT_SELECT_BY_ID_TENANT)
            .bind(payment_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_payment_by_id_any_tenant(&self, payment_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!("{PAYMENT_SELECT} WHERE id = $1"))
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_payment_by_tx_hash(&self, tx_hash: &str) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!("{PAYMENT_SELECT} WHERE tx_hash = $1"))
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn pending_payment_for_user(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "{PAYMENT_SELECT} WHERE tenant_id = $1 AND external_user_id = $2 AND status IN ('pending', 'awaiting_confirmation')"
        ))
        .bind(tenant_id)
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn payment_history(
        &self,
        tenant_id: &str,
        external_user_id: &str,
        limit: u32,
    ) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "{PAYMENT_SELECT} WHERE tenant_id = $1 AND external_user_id = $2 ORDER BY created_at DESC LIMIT $3"
        ))
        .bind(tenant_id)
        .bind(external_user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn awaiting_confirmation_payments(&self) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "{PAYMENT_SELECT} WHERE status = 'awaiting_confirmation'"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn expired_pending_payments(&self, now: DateTime<Utc>) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "{PAYMENT_SELECT} WHERE status IN ('pending', 'awaiting_confirmation') AND expires_at <= $1"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn mark_awaiting_confirmation(&self, tenant_id: &str, payment_id: &str) -> Result<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = 'awaiting_confirmation', updated_at = NOW()
             WHERE id = $1 AND tenant_id = $2 AND status = 'pending'
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PayhubError::InvalidStatus("payment is not pending".to_string()))?;

        row.try_into()
    }

    async fn mark_payment_expired(&self, payment_id: &str) -> Result<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = 'expired', updated_at = NOW() WHERE id = $1 RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;

        row.try_into()
    }

    async fn mark_payment_cancelled(&self, tenant_id: &str, payment_id: &str) -> Result<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = 'cancelled', updated_at = NOW()
             WHERE id = $1 AND tenant_id = $2 AND status = 'pending'
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(PayhubError::CannotCancel)?;

        row.try_into()
    }

    async fn mark_payment_failed(&self, payment_id: &str, error_message: &str) -> Result<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = 'failed', error_message = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(error_message)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;

        row.try_into()
    }

    async fn increment_payment_retry(&self, payment_id: &str) -> Result<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET retry_count = retry_count + 1, updated_at = NOW() WHERE id = $1 RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PayhubError::NotFound(format!("payment {payment_id}")))?;

        row.try_into()
    }

    async fn confirm_payment_and_activate_subscription(
        &self,
        payment_id: &str,
        tx_hash: &str,
        confirmations: i32,
        new_subscription: NewSubscription,
    ) -> Result<(Payment, Subscription)> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let payment_row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = 'confirmed', tx_hash = $1, confirmations = $2,
                tx_confirmed_at = NOW(), updated_at = NOW()
             WHERE id = $3 AND status = 'awaiting_confirmation'
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(tx_hash)
        .bind(confirmations)
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            if constraint_name(&e) == Some("payments_tx_hash_key") {
                PayhubError::Internal(format!("tx_hash {tx_hash} already claimed by another payment"))
            } else {
                db_err(e)
            }
        })?
        .ok_or_else(|| {
            PayhubError::InvalidStatus("payment is not awaiting_confirmation".to_string())
        })?;

        // I6: demote any currently active subscription before the insert races the
        // partial unique index.
        sqlx::query(
            r#"UPDATE subscriptions SET status = 'expired'
               WHERE tenant_id = $1 AND external_user_id = $2 AND status = 'active'"#,
        )
        .bind(&new_subscription.tenant_id)
        .bind(&new_subscription.external_user_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let subscription_id = new_id("sub");
        let subscription_row = sqlx::query_as::<_, SubscriptionRow>(
            r#"INSERT INTO subscriptions (id, tenant_id, external_user_id, plan_id, payment_id, status, starts_at, ends_at)
               VALUES ($1, $2, $3, $4, $5, 'active', $6, $7)
               RETURNING id, tenant_id, external_user_id, plan_id, payment_id, status, starts_at, ends_at"#,
        )
        .bind(&subscription_id)
        .bind(&new_subscription.tenant_id)
        .bind(&new_subscription.external_user_id)
        .bind(&new_subscription.plan_id)
        .bind(&new_subscription.payment_id)
        .bind(new_subscription.starts_at)
        .bind(new_subscription.ends_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok((payment_row.try_into()?, subscription_row.try_into()?))
    }

    async fn active_subscription(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"SELECT id, tenant_id, external_user_id, plan_id, payment_id, status, starts_at, ends_at
               FROM subscriptions WHERE tenant_id = $1 AND external_user_id = $2 AND status = 'active'"#,
        )
        .bind(tenant_id)
        .bind(external_user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(TryInto::try_into).transpose()
    }

    async fn subscription_history(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"SELECT id, tenant_id, external_user_id, plan_id, payment_id, status, starts_at, ends_at
               FROM subscriptions WHERE tenant_id = $1 AND external_user_id = $2 ORDER BY starts_at DESC"#,
        )
        .bind(tenant_id)
        .bind(external_user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn expired_subscriptions(&self, now: DateTime<Utc>) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            r#"SELECT id, tenant_id, external_user_id, plan_id, payment_id, status, starts_at, ends_at
               FROM subscriptions WHERE status = 'active' AND ends_at IS NOT NULL AND ends_at <= $1"#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn mark_subscription_expired(&self, subscription_id: &str) -> Result<Subscription> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r#"UPDATE subscriptions SET status = 'expired' WHERE id = $1
               RETURNING id, tenant_id, external_user_id, plan_id, payment_id, status, starts_at, ends_at"#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PayhubError::NotFound(format!("subscription {subscription_id}")))?;

        row.try_into()
    }

    async fn create_webhook_log(&self, log: NewWebhookLog) -> Result<WebhookLog> {
        let id = new_id("whl");
        let row = sqlx::query_as::<_, WebhookLogRow>(
            r#"INSERT INTO webhook_logs (id, tenant_id, event, payload, target_url)
               VALUES ($1, $2, $3, $4, $5)
               RETURNING id, tenant_id, event, payload, target_url, last_response_status,
                    last_response_body, success, retry_count, next_retry_at, created_at"#,
        )
        .bind(&id)
        .bind(&log.tenant_id)
        .bind(&log.event)
        .bind(&log.payload)
        .bind(&log.target_url)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.into())
    }

    async fn record_webhook_delivery_success(
        &self,
        log_id: &str,
        response_status: i32,
        response_body: Option<String>,
    ) -> Result<WebhookLog> {
        let row = sqlx::query_as::<_, WebhookLogRow>(
            r#"UPDATE webhook_logs SET success = TRUE, last_response_status = $1,
                    last_response_body = $2, next_retry_at = NULL
               WHERE id = $3
               RETURNING id, tenant_id, event, payload, target_url, last_response_status,
                    last_response_body, success, retry_count, next_retry_at, created_at"#,
        )
        .bind(response_status)
        .bind(response_body)
        .bind(log_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PayhubError::NotFound(format!("webhook log {log_id}")))?;

        Ok(row.into())
    }

    async fn record_webhook_delivery_failure(
        &self,
        log_id: &str,
        response_status: Option<i32>,
        response_body: Option<String>,
        retry_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<WebhookLog> {
        let row = sqlx::query_as::<_, WebhookLogRow>(
            r#"UPDATE webhook_logs SET last_response_status = $1, last_response_body = $2,
                    retry_count = $3, next_retry_at = $4
               WHERE id = $5
               RETURNING id, tenant_id, event, payload, target_url, last_response_status,
                    last_response_body, success, retry_count, next_retry_at, created_at"#,
        )
        .bind(response_status)
        .bind(response_body)
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(log_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| PayhubError::NotFound(format!("webhook log {log_id}")))?;

        Ok(row.into())
    }

    async fn pending_webhooks(&self, now: DateTime<Utc>, max_retries: i32) -> Result<Vec<WebhookLog>> {
        let rows = sqlx::query_as::<_, WebhookLogRow>(
            r#"SELECT id, tenant_id, event, payload, target_url, last_response_status,
                    last_response_body, success, retry_count, next_retry_at, created_at
               FROM webhook_logs
               WHERE success = FALSE AND retry_count < $1 AND (next_retry_at IS NULL OR next_retry_at <= $2)"#,
        )
        .bind(max_retries)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(WebhookLog::from).collect())
    }

    async fn replace_ofac_addresses(&self, addresses: Vec<OfacSanctionedAddress>) -> Result<(i64, i64)> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let old_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ofac_sanctioned_addresses")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        sqlx::query("DELETE FROM ofac_sanctioned_addresses")
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for addr in &addresses {
            sqlx::query(
                r#"INSERT INTO ofac_sanctioned_addresses
                    (address, address_lower, address_type, sdn_name, sdn_id, source, last_seen_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7)
                   ON CONFLICT (address_lower, address_type) DO UPDATE SET
                        address = EXCLUDED.address, sdn_name = EXCLUDED.sdn_name,
                        sdn_id = EXCLUDED.sdn_id, source = EXCLUDED.source,
                        last_seen_at = EXCLUDED.last_seen_at"#,
            )
            .bind(&addr.address)
            .bind(&addr.address_lower)
            .bind(&addr.address_type)
            .bind(&addr.sdn_name)
            .bind(&addr.sdn_id)
            .bind(&addr.source)
            .bind(addr.last_seen_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;

        Ok((old_count.0, addresses.len() as i64))
    }

    async fn check_ofac_address(&self, address_lower: &str) -> Result<Vec<OfacSanctionedAddress>> {
        let rows = sqlx::query_as::<_, OfacAddressRow>(
            r#"SELECT address, address_lower, address_type, sdn_name, sdn_id, source, last_seen_at
               FROM ofac_sanctioned_addresses WHERE address_lower = $1"#,
        )
        .bind(address_lower)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(OfacSanctionedAddress::from).collect())
    }

    async fn ofac_address_count(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ofac_sanctioned_addresses")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.0)
    }

    async fn ofac_address_type_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT address_type, COUNT(*) FROM ofac_sanctioned_addresses GROUP BY address_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows)
    }

    async fn append_ofac_update_log(&self, log: OfacUpdateLog) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO ofac_update_logs (id, total, new_count, removed_count, success, error, created_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&log.id)
        .bind(log.total)
        .bind(log.new_count)
        .bind(log.removed_count)
        .bind(log.success)
        .bind(&log.error)
        .bind(log.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn last_ofac_update_log(&self) -> Result<Option<OfacUpdateLog>> {
        let row = sqlx::query_as::<_, OfacUpdateLogRow>(
            r#"SELECT id, total, new_count, removed_count, success, error, created_at
               FROM ofac_update_logs ORDER BY created_at DESC LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(OfacUpdateLog::from))
    }
}

const PAYMENT_COLUMNS: &str = "id, tenant_id, external_user_id, plan_id, amount, token, network,
    sender_address_encrypted, sender_address_hmac, receiver_address, status,
    tx_hash, confirmations, tx_confirmed_at, error_message, retry_count,
    created_at, updated_at, expires_at";

const PAYMENT_SELECT: &str = "SELECT id, tenant_id, external_user_id, plan_id, amount, token, network,
    sender_address_encrypted, sender_address_hmac, receiver_address, status,
    tx_hash, confirmations, tx_confirmed_at, error_message, retry_count,
    created_at, updated_at, expires_at FROM payments";

const PAYMENT_SELECT_BY_ID_TENANT: &str = "SELECT id, tenant_id, external_user_id, plan_id, amount, token, network,
    sender_address_encrypted, sender_address_hmac, receiver_address, status,
    tx_hash, confirmations, tx_confirmed_at, error_message, retry_count,
    created_at, updated_at, expires_at FROM payments WHERE id = $1 AND tenant_id = $2";

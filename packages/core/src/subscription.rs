//! Subscription activation and expiry sweep.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::info;

use crate::domain::{NewSubscription, Subscription};
use crate::error::{PayhubError, Result};
use crate::storage::Storage;
use crate::webhook::WebhookEngine;

pub struct SubscriptionEngine {
    storage: Arc<dyn Storage>,
}

impl SubscriptionEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Builds the `NewSubscription` for a confirmed payment without writing
    /// it; the write happens inside the payment engine's atomic confirmation
    /// transaction (`Storage::confirm_payment_and_activate_subscription`).
    pub async fn build_activation(
        &self,
        tenant_id: &str,
        external_user_id: &str,
        plan_id: &str,
        payment_id: &str,
    ) -> Result<NewSubscription> {
        let plan = self
            .storage
            .get_plan(tenant_id, plan_id)
            .await?
            .ok_or_else(|| PayhubError::InvalidPlan(format!("plan {plan_id} not found")))?;

        let starts_at = Utc::now();
        let ends_at = plan
            .period_days
            .map(|days| starts_at + ChronoDuration::days(days));

        Ok(NewSubscription {
            tenant_id: tenant_id.to_string(),
            external_user_id: external_user_id.to_string(),
            plan_id: plan_id.to_string(),
            payment_id: Some(payment_id.to_string()),
            starts_at,
            ends_at,
        })
    }

    pub async fn current_subscription(
        &self,
        tenant_id: &str,
        external_user_id: &str,
    ) -> Result<Option<Subscription>> {
        self.storage.active_subscription(tenant_id, external_user_id).await
    }

    pub async fn is_active(&self, tenant_id: &str, external_user_id: &str) -> Result<bool> {
        Ok(self.current_subscription(tenant_id, external_user_id).await?.is_some())
    }

    pub async fn history(&self, tenant_id: &str, external_user_id: &str) -> Result<Vec<Subscription>> {
        self.storage.subscription_history(tenant_id, external_user_id).await
    }
}

/// Sweeps subscriptions past `ends_at` to `expired`. Invoked by the
/// scheduler hourly (SPEC_FULL.md §5).
pub async fn expire_due_subscriptions(
    storage: &Arc<dyn Storage>,
    webhooks: &Arc<WebhookEngine>,
) -> Result<usize> {
    let now = Utc::now();
    let due = storage.expired_subscriptions(now).await?;
    let count = due.len();
    for subscription in due {
        let updated = storage.mark_subscription_expired(&subscription.id).await?;
        info!(subscription_id = %updated.id, "subscription expired");
        webhooks
            .enqueue(
                &updated.tenant_id,
                "subscription.expired",
                json!({
                    "subscription_id": updated.id,
                    "external_user_id": updated.external_user_id,
                    "plan_id": updated.plan_id,
                    "payment_id": updated.payment_id,
                    "starts_at": updated.starts_at,
                    "ends_at": updated.ends_at,
                }),
            )
            .await;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn days_remaining_is_non_negative() {
        let sub = Subscription {
            id: "sub1".into(),
            tenant_id: "t1".into(),
            external_user_id: "u1".into(),
            plan_id: "p1".into(),
            payment_id: None,
            status: crate::domain::SubscriptionStatus::Active,
            starts_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            ends_at: Some(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() - ChronoDuration::days(1)),
        };
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(sub.days_remaining(now), Some(0));
    }
}

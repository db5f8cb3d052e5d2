//! Signed, at-least-once webhook delivery with a fixed retry schedule.
//! Style grounded on `operator/src/writers/retry.rs` (retry context struct,
//! `tracing` spans on each attempt) adapted to a literal delay table instead
//! of the teacher's exponential/gas-bump backoff.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::crypto::sign_webhook_payload;
use crate::domain::{NewWebhookLog, WebhookLog};
use crate::error::Result;
use crate::metrics::WEBHOOK_DELIVERIES_TOTAL;
use crate::storage::Storage;

/// Seconds to wait before each successive retry, 0-indexed by `retry_count`
/// at the time of the failure that triggers the schedule.
pub const RETRY_DELAYS_SECONDS: [i64; 4] = [60, 300, 900, 3600];
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RESPONSE_BODY_BYTES: usize = 1000;

pub struct WebhookEngine {
    storage: Arc<dyn Storage>,
    client: Client,
}

impl WebhookEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let client = Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .expect("building the webhook http client with a fixed timeout cannot fail");
        Self { storage, client }
    }

    /// Enqueues an event for delivery and attempts it immediately. Delivery
    /// failures are absorbed into the retry schedule, never surfaced to the
    /// caller (at-least-once semantics, SPEC_FULL.md §4.5).
    pub async fn enqueue(&self, tenant_id: &str, event: &str, data: Value) {
        let tenant = match self.storage.get_tenant(tenant_id).await {
            Ok(Some(t)) => t,
            Ok(None) => {
                warn!(%tenant_id, "webhook enqueue: unknown tenant");
                return;
            }
            Err(e) => {
                error!(%tenant_id, error = %e, "webhook enqueue: storage error loading tenant");
                return;
            }
        };

        let (Some(target_url), Some(webhook_secret)) = (tenant.webhook_url, tenant.webhook_secret) else {
            info!(%tenant_id, %event, "no webhook configured for tenant, skipping delivery");
            return;
        };

        let payload = json!({
            "event": event,
            "timestamp": Utc::now(),
            "data": data,
        });
        let payload_string = payload.to_string();

        let log = match self
            .storage
            .create_webhook_log(NewWebhookLog {
                tenant_id: tenant_id.to_string(),
                event: event.to_string(),
                payload: payload_string.clone(),
                target_url,
            })
            .await
        {
            Ok(log) => log,
            Err(e) => {
                error!(%tenant_id, %event, error = %e, "failed to create webhook log");
                return;
            }
        };

        if let Err(e) = self.deliver_once(&log, &webhook_secret).await {
            warn!(log_id = %log.id, error = %e, "webhook delivery attempt failed");
        }
    }

    /// One delivery attempt for an existing log row. On failure, schedules
    /// the next retry per `RETRY_DELAYS_SECONDS`.
    pub async fn deliver_once(&self, log: &WebhookLog, webhook_secret: &str) -> Result<()> {
        let signature = sign_webhook_payload(webhook_secret, &log.payload);

        let result = self
            .client
            .post(&log.target_url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", signature)
            .body(log.payload.clone())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let truncated: String = body.chars().take(MAX_RESPONSE_BODY_BYTES).collect();
                if status.is_success() {
                    self.storage
                        .record_webhook_delivery_success(&log.id, status.as_u16() as i32, Some(truncated))
                        .await?;
                    WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["success"]).inc();
                    info!(log_id = %log.id, %status, "webhook delivered");
                    Ok(())
                } else {
                    WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["failure"]).inc();
                    self.schedule_retry(log, Some(status.as_u16() as i32), Some(truncated)).await
                }
            }
            Err(e) => {
                warn!(log_id = %log.id, error = %e, "webhook transport error");
                WEBHOOK_DELIVERIES_TOTAL.with_label_values(&["failure"]).inc();
                self.schedule_retry(log, None, Some(e.to_string())).await
            }
        }
    }

    async fn schedule_retry(
        &self,
        log: &WebhookLog,
        response_status: Option<i32>,
        response_body: Option<String>,
    ) -> Result<()> {
        let next_attempt = log.retry_count + 1;
        let next_retry_at =
            next_retry_delay_seconds(log.retry_count).map(|delay| Utc::now() + ChronoDuration::seconds(delay));

        self.storage
            .record_webhook_delivery_failure(
                &log.id,
                response_status,
                response_body,
                next_attempt,
                next_retry_at,
            )
            .await?;

        if next_retry_at.is_none() {
            warn!(log_id = %log.id, "webhook retries exhausted, giving up");
        }

        Ok(())
    }

    /// Redelivers all eligible logs. Invoked by the scheduler every 2 minutes.
    pub async fn retry_pending(&self) -> Result<usize> {
        let now = Utc::now();
        let pending = self
            .storage
            .pending_webhooks(now, RETRY_DELAYS_SECONDS.len() as i32)
            .await?;
        let count = pending.len();

        for log in pending {
            let Some(tenant) = self.storage.get_tenant(&log.tenant_id).await? else {
                continue;
            };
            let Some(secret) = tenant.webhook_secret else {
                continue;
            };
            if let Err(e) = self.deliver_once(&log, &secret).await {
                error!(log_id = %log.id, error = %e, "retry delivery failed");
            }
        }

        Ok(count)
    }
}

pub fn next_retry_delay_seconds(retry_count: i32) -> Option<i64> {
    RETRY_DELAYS_SECONDS.get(retry_count as usize).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_schedule_is_fixed() {
        assert_eq!(RETRY_DELAYS_SECONDS, [60, 300, 900, 3600]);
    }

    #[test]
    fn exhausts_after_four_attempts() {
        assert!(next_retry_delay_seconds(3).is_some());
        assert!(next_retry_delay_seconds(4).is_none());
    }
}

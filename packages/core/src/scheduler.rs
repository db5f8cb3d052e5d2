//! Wires the monitor tick, expiry sweeps, webhook retry, and OFAC refresh
//! into one background scheduler with graceful shutdown. Grounded on
//! `operator/src/main.rs`'s multi-channel shutdown fan-out and per-task
//! `tokio::select!` loops.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::monitor::Monitor;
use crate::ofac::OfacScreener;
use crate::payment::{expire_due_payments, PaymentEngine};
use crate::storage::Storage;
use crate::subscription::expire_due_subscriptions;
use crate::webhook::WebhookEngine;

const EXPIRE_PAYMENTS_INTERVAL: Duration = Duration::from_secs(5 * 60);
const EXPIRE_SUBSCRIPTIONS_INTERVAL: Duration = Duration::from_secs(60 * 60);
const RETRY_WEBHOOKS_INTERVAL: Duration = Duration::from_secs(2 * 60);
const OFAC_REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Scheduler {
    storage: Arc<dyn Storage>,
    monitor: Arc<Monitor>,
    payment_engine: Arc<PaymentEngine>,
    webhooks: Arc<WebhookEngine>,
    ofac: Arc<OfacScreener>,
}

/// One shutdown channel per background task, matching the teacher's
/// three-channel fan-out in `operator/src/main.rs`.
pub struct ShutdownHandles {
    pub monitor: mpsc::Sender<()>,
    pub expire_payments: mpsc::Sender<()>,
    pub expire_subscriptions: mpsc::Sender<()>,
    pub retry_webhooks: mpsc::Sender<()>,
    pub ofac_refresh: mpsc::Sender<()>,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        monitor: Arc<Monitor>,
        payment_engine: Arc<PaymentEngine>,
        webhooks: Arc<WebhookEngine>,
        ofac: Arc<OfacScreener>,
    ) -> Self {
        Self {
            storage,
            monitor,
            payment_engine,
            webhooks,
            ofac,
        }
    }

    /// Spawns every periodic task and returns the handles the caller
    /// (`payhub-server::main`) fans shutdown signals into.
    pub fn spawn_all(self: Arc<Self>) -> ShutdownHandles {
        let (monitor_tx, monitor_rx) = mpsc::channel(1);
        let (expire_payments_tx, expire_payments_rx) = mpsc::channel(1);
        let (expire_subscriptions_tx, expire_subscriptions_rx) = mpsc::channel(1);
        let (retry_webhooks_tx, retry_webhooks_rx) = mpsc::channel(1);
        let (ofac_refresh_tx, ofac_refresh_rx) = mpsc::channel(1);

        let monitor = self.monitor.clone();
        let payment_engine = self.payment_engine.clone();
        tokio::spawn(async move {
            if let Err(e) = monitor.run(payment_engine, monitor_rx).await {
                error!(error = %e, "monitor task exited with error");
            }
        });

        let storage = self.storage.clone();
        let webhooks = self.webhooks.clone();
        tokio::spawn(run_periodic(
            "expire-payments",
            EXPIRE_PAYMENTS_INTERVAL,
            Duration::ZERO,
            expire_payments_rx,
            move || {
                let storage = storage.clone();
                let webhooks = webhooks.clone();
                async move {
                    match expire_due_payments(&storage, &webhooks).await {
                        Ok(n) if n > 0 => info!(count = n, "expired due payments"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "expire-payments task failed"),
                    }
                }
            },
        ));

        let storage = self.storage.clone();
        let webhooks = self.webhooks.clone();
        tokio::spawn(run_periodic(
            "expire-subscriptions",
            EXPIRE_SUBSCRIPTIONS_INTERVAL,
            Duration::ZERO,
            expire_subscriptions_rx,
            move || {
                let storage = storage.clone();
                let webhooks = webhooks.clone();
                async move {
                    match expire_due_subscriptions(&storage, &webhooks).await {
                        Ok(n) if n > 0 => info!(count = n, "expired due subscriptions"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "expire-subscriptions task failed"),
                    }
                }
            },
        ));

        let webhooks = self.webhooks.clone();
        tokio::spawn(run_periodic(
            "retry-webhooks",
            RETRY_WEBHOOKS_INTERVAL,
            Duration::ZERO,
            retry_webhooks_rx,
            move || {
                let webhooks = webhooks.clone();
                async move {
                    match webhooks.retry_pending().await {
                        Ok(n) if n > 0 => info!(count = n, "retried pending webhooks"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "retry-webhooks task failed"),
                    }
                }
            },
        ));

        let ofac = self.ofac.clone();
        tokio::spawn(async move {
            if let Err(e) = ofac.refresh_if_empty().await {
                error!(error = %e, "initial OFAC ingestion failed");
            }
        });

        let ofac = self.ofac.clone();
        let initial_delay = duration_until_next_utc_midnight();
        info!(seconds = initial_delay.as_secs(), "OFAC refresh scheduled for next UTC midnight");
        tokio::spawn(run_periodic(
            "ofac-refresh",
            OFAC_REFRESH_INTERVAL,
            initial_delay,
            ofac_refresh_rx,
            move || {
                let ofac = ofac.clone();
                async move {
                    match ofac.refresh().await {
                        Ok(log) => info!(total = log.total, "OFAC refresh complete"),
                        Err(e) => error!(error = %e, "OFAC refresh failed"),
                    }
                }
            },
        ));

        ShutdownHandles {
            monitor: monitor_tx,
            expire_payments: expire_payments_tx,
            expire_subscriptions: expire_subscriptions_tx,
            retry_webhooks: retry_webhooks_tx,
            ofac_refresh: ofac_refresh_tx,
        }
    }
}

async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    initial_delay: Duration,
    mut shutdown_rx: mpsc::Receiver<()>,
    mut task: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let start = tokio::time::Instant::now() + initial_delay;
    let mut interval = tokio::time::interval_at(start, period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                task().await;
            }
            _ = shutdown_rx.recv() => {
                info!(task = name, "periodic task received shutdown signal");
                return;
            }
        }
    }
}

/// Seconds from now to the next UTC midnight, so the OFAC refresh lands at
/// 00:00 UTC regardless of process start time, per its daily schedule.
fn duration_until_next_utc_midnight() -> Duration {
    let now = Utc::now();
    let next_midnight = now
        .date_naive()
        .succ_opt()
        .expect("chrono date does not overflow in practice")
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time")
        .and_utc();
    (next_midnight - now).to_std().unwrap_or(Duration::ZERO)
}

/// Fans a single shutdown signal out to every background task.
pub async fn shutdown_all(handles: &ShutdownHandles) {
    let _ = handles.monitor.send(()).await;
    let _ = handles.expire_payments.send(()).await;
    let _ = handles.expire_subscriptions.send(()).await;
    let _ = handles.retry_webhooks.send(()).await;
    let _ = handles.ofac_refresh.send(()).await;
}

//! Concurrent polling engine: enrollment map, tick loop, adapter dispatch,
//! bootstrap re-enrollment. Style grounded on
//! `operator/src/watchers/mod.rs::WatcherManager` (`JoinSet` + `tokio::select!`
//! shutdown race); the enrollment map itself uses `dashmap` (pulled in from
//! `x402-rs-x402-rs`/the reth-fork examples in the pack, not present in the
//! chosen teacher) rather than the teacher's TTL-evicting `BoundedHashCache`,
//! since this map must stay unbounded (SPEC_FULL.md §5).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::chain::{evm::EvmAdapter, tron::TronAdapter, ChainAdapter, TransferQuery};
use crate::domain::{Network, Payment, PaymentStatus};
use crate::error::Result;
use crate::metrics::{MONITOR_QUEUE_SIZE, PAYMENTS_BY_NETWORK};
use crate::payment::{PaymentEngine, MAX_MONITOR_RETRIES};
use crate::storage::Storage;

pub const TICK_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct EnrollmentState {
    retry_count: i32,
    network: Network,
}

/// Adapters keyed by network. `payhub-server` wires these up at startup from
/// `ALCHEMY_API_KEY` / `TRONGRID_API_KEY` / `RPC_TRON`.
pub struct ChainAdapters {
    pub arbitrum: Option<Arc<EvmAdapter>>,
    pub ethereum: Option<Arc<EvmAdapter>>,
    pub tron: Option<Arc<TronAdapter>>,
}

impl ChainAdapters {
    fn get(&self, network: Network) -> Option<Arc<dyn ChainAdapter>> {
        match network {
            Network::Arbitrum => self.arbitrum.clone().map(|a| a as Arc<dyn ChainAdapter>),
            Network::Ethereum => self.ethereum.clone().map(|a| a as Arc<dyn ChainAdapter>),
            Network::Tron => self.tron.clone().map(|a| a as Arc<dyn ChainAdapter>),
        }
    }
}

pub struct Monitor {
    storage: Arc<dyn Storage>,
    adapters: ChainAdapters,
    queue: DashMap<String, EnrollmentState>,
}

impl Monitor {
    pub fn new(storage: Arc<dyn Storage>, adapters: ChainAdapters) -> Arc<Self> {
        Arc::new(Self {
            storage,
            adapters,
            queue: DashMap::new(),
        })
    }

    pub async fn enroll(&self, payment_id: String, network: Network) {
        if let Entry::Vacant(entry) = self.queue.entry(payment_id) {
            entry.insert(EnrollmentState { retry_count: 0, network });
            MONITOR_QUEUE_SIZE.set(self.queue.len() as i64);
            PAYMENTS_BY_NETWORK.with_label_values(&[network.as_str()]).inc();
        }
    }

    pub fn unenroll(&self, payment_id: &str) {
        if let Some((_, state)) = self.queue.remove(payment_id) {
            MONITOR_QUEUE_SIZE.set(self.queue.len() as i64);
            PAYMENTS_BY_NETWORK.with_label_values(&[state.network.as_str()]).dec();
        }
    }

    pub fn size(&self) -> usize {
        self.queue.len()
    }

    pub fn in_queue(&self, payment_id: &str) -> bool {
        self.queue.contains_key(payment_id)
    }

    /// Re-enrolls every payment currently `awaiting_confirmation` so a
    /// restart never loses in-flight monitoring.
    pub async fn bootstrap(&self) -> Result<usize> {
        let in_flight = self.storage.awaiting_confirmation_payments().await?;
        let count = in_flight.len();
        for payment in in_flight {
            self.enroll(payment.id, payment.network).await;
        }
        info!(count, "monitor bootstrap: re-enrolled in-flight payments");
        Ok(count)
    }

    /// Runs the tick loop until `shutdown_rx` receives a signal.
    pub async fn run(
        self: Arc<Self>,
        engine: Arc<PaymentEngine>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        self.bootstrap().await?;

        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.clone().tick(engine.clone()).await {
                        error!(error = %e, "monitor tick failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("monitor received shutdown signal");
                    return Ok(());
                }
            }
        }
    }

    async fn tick(self: Arc<Self>, engine: Arc<PaymentEngine>) -> Result<()> {
        let payment_ids: Vec<String> = self.queue.iter().map(|e| e.key().clone()).collect();
        if payment_ids.is_empty() {
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        for payment_id in payment_ids {
            let this = self.clone();
            let engine = engine.clone();
            tasks.spawn(async move { this.check_one(engine, payment_id).await });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "monitor tick task panicked");
            }
        }

        Ok(())
    }

    async fn check_one(&self, engine: Arc<PaymentEngine>, payment_id: String) {
        let payment = match self.storage.get_payment_by_id_any_tenant(&payment_id).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                self.unenroll(&payment_id);
                return;
            }
            Err(e) => {
                error!(%payment_id, error = %e, "monitor: failed to load payment");
                return;
            }
        };

        if payment.status != PaymentStatus::AwaitingConfirmation {
            self.unenroll(&payment_id);
            return;
        }

        if Utc::now() > payment.expires_at {
            if let Err(e) = engine.mark_expired(&payment).await {
                error!(%payment_id, error = %e, "monitor: failed to mark payment expired");
            }
            self.unenroll(&payment_id);
            return;
        }

        let Some(adapter) = self.adapters.get(payment.network) else {
            return;
        };

        let sender_address = match engine_decrypt_sender(&engine, &payment) {
            Ok(addr) => addr,
            Err(e) => {
                error!(%payment_id, error = %e, "monitor: failed to decrypt sender address");
                return;
            }
        };

        let query = TransferQuery {
            sender_address: &sender_address,
            receiver_address: &payment.receiver_address,
            token: payment.token,
            network: payment.network,
            required_amount: payment.amount,
            created_at: payment.created_at,
        };

        match adapter.find_transfer(&query).await {
            Ok(result) if result.found => {
                let tx_hash = result.tx_hash.unwrap_or_default();
                let confirmations = result.confirmations.unwrap_or(0);
                let amount = result.amount.unwrap_or_default();
                if let Err(e) = engine
                    .handle_confirmed_transaction(&payment, &tx_hash, confirmations, amount)
                    .await
                {
                    warn!(%payment_id, error = %e, "monitor: confirmation handler rejected match");
                }
                self.unenroll(&payment_id);
            }
            Ok(_) => {
                // not found this tick, leave enrolled
            }
            Err(e) => {
                let retries = self.record_retry(&payment_id, payment.network);
                warn!(%payment_id, error = %e, retries, "monitor: adapter error");
                if retries >= MAX_MONITOR_RETRIES {
                    if let Err(e) = engine.mark_failed(&payment, &e.to_string()).await {
                        error!(%payment_id, error = %e, "monitor: failed to mark payment failed");
                    }
                    self.unenroll(&payment_id);
                }
            }
        }
    }

    fn record_retry(&self, payment_id: &str, network: Network) -> i32 {
        let mut entry = self
            .queue
            .entry(payment_id.to_string())
            .or_insert_with(|| EnrollmentState { retry_count: 0, network });
        entry.retry_count += 1;
        entry.retry_count
    }
}

/// Small seam so `check_one` doesn't need to reach into `PaymentEngine`'s
/// private crypto context; exposed via `PaymentEngine::decrypt_sender`.
fn engine_decrypt_sender(engine: &Arc<PaymentEngine>, payment: &Payment) -> Result<String> {
    engine.decrypt_sender_address(payment)
}

//! Prometheus metrics, registered once at process start. Grounded on
//! `operator/src/metrics.rs`'s `lazy_static!` + `register_*_vec!` pattern.

use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, register_int_gauge, register_int_gauge_vec, IntCounterVec, IntGauge, IntGaugeVec};

lazy_static! {
    pub static ref MONITOR_QUEUE_SIZE: IntGauge = register_int_gauge!(
        "payhub_monitor_queue_size",
        "Number of payments currently enrolled in the monitor"
    )
    .expect("constant metric name is valid");

    pub static ref OFAC_ADDRESS_SET_SIZE: IntGauge = register_int_gauge!(
        "payhub_ofac_address_set_size",
        "Number of sanctioned addresses currently tracked"
    )
    .expect("constant metric name is valid");

    pub static ref PAYMENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "payhub_payments_total",
        "Payments processed, labeled by terminal status",
        &["status"]
    )
    .expect("constant metric name is valid");

    pub static ref WEBHOOK_DELIVERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "payhub_webhook_deliveries_total",
        "Webhook delivery attempts, labeled by outcome",
        &["outcome"]
    )
    .expect("constant metric name is valid");

    pub static ref PAYMENTS_BY_NETWORK: IntGaugeVec = register_int_gauge_vec!(
        "payhub_payments_in_flight_by_network",
        "Payments currently pending or awaiting confirmation, by network",
        &["network"]
    )
    .expect("constant metric name is valid");
}

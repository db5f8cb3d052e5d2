//! Axum HTTP surface. Routes and JSON shapes per SPEC_FULL.md §6.1. Grounded
//! on `canceler/src/server.rs`'s `Router`/`AppState`/handler layout, extended
//! with a tenant-scoped `Storage`-backed domain instead of a single shared
//! stats struct.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use chrono::Utc;
use payhub_core::address;
use payhub_core::chain::chain_config;
use payhub_core::domain::{Network, NewPlan, PlanUpdate, Token};
use payhub_core::error::PayhubError;
use payhub_core::monitor::Monitor;
use payhub_core::ofac::OfacScreener;
use payhub_core::payment::PaymentEngine;
use payhub_core::storage::Storage;
use payhub_core::subscription::SubscriptionEngine;
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error_response::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub payment_engine: Arc<PaymentEngine>,
    pub subscriptions: Arc<SubscriptionEngine>,
    pub ofac: Arc<OfacScreener>,
    pub monitor: Arc<Monitor>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/networks", get(networks))
        .route("/api/plans", get(list_plans).post(create_plan))
        .route("/api/plans/{id}", patch(update_plan))
        .route("/api/payments", post(create_payment))
        .route("/api/payments/{id}/confirm", post(confirm_payment))
        .route("/api/payments/{id}/status", get(payment_status))
        .route("/api/payments/history", get(payment_history))
        .route("/api/payments/{id}", delete(cancel_payment))
        .route("/api/validate-address", post(validate_address))
        .route("/api/subscriptions/current", get(subscription_current))
        .route("/api/subscriptions/history", get(subscription_history))
        .route("/api/subscriptions/active", get(subscription_active))
        .route("/api/ofac/status", get(ofac_status))
        .route("/api/ofac/check/{address}", get(ofac_check))
        .route("/api/ofac/update", post(ofac_update))
        .route("/api/metrics", get(metrics))
        .with_state(state)
}

fn tenant_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get("X-Tenant-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(|| ApiError(PayhubError::Unauthorized))
}

#[derive(Deserialize)]
struct UserScopedQuery {
    external_user_id: String,
    #[serde(default)]
    limit: Option<u32>,
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
        "monitor_queue_size": state.monitor.size(),
    }))
}

#[derive(Serialize)]
struct NetworkInfo {
    network: &'static str,
    tokens: Vec<&'static str>,
    confirmations_required: u32,
    estimated_confirmation_seconds: u32,
    fee_hint: &'static str,
    recommended: bool,
}

async fn networks() -> Json<Vec<NetworkInfo>> {
    let networks = [Network::Tron, Network::Arbitrum, Network::Ethereum];
    let infos = networks
        .into_iter()
        .map(|network| {
            let config = chain_config(network);
            NetworkInfo {
                network: network.as_str(),
                tokens: vec![Token::Usdt.as_str(), Token::Usdc.as_str()],
                confirmations_required: config.min_confirmations,
                estimated_confirmation_seconds: config.estimated_confirmation_seconds(),
                fee_hint: config.fee_hint,
                // Tron settles faster in wall-clock time despite needing more
                // block confirmations, and its fees are materially lower.
                recommended: matches!(network, Network::Tron),
            }
        })
        .collect();
    Json(infos)
}

async fn list_plans(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = tenant_id(&headers)?;
    let plans = state.storage.list_active_plans(&tenant_id).await.map_err(ApiError)?;
    Ok(Json(json!(plans)))
}

#[derive(Deserialize)]
struct CreatePlanRequest {
    plan_key: String,
    name: String,
    description: Option<String>,
    price: rust_decimal::Decimal,
    currency: String,
    period_days: Option<i64>,
    #[serde(default)]
    features: Vec<String>,
}

async fn create_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePlanRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let tenant_id = tenant_id(&headers)?;
    let currency = Token::parse(&req.currency)
        .ok_or_else(|| ApiError(PayhubError::Validation(format!("unknown currency {}", req.currency))))?;

    let plan = state
        .storage
        .create_plan(
            &tenant_id,
            NewPlan {
                plan_key: req.plan_key,
                name: req.name,
                description: req.description,
                price: req.price,
                currency,
                period_days: req.period_days,
                features: req.features,
            },
        )
        .await
        .map_err(ApiError)?;

    Ok((StatusCode::CREATED, Json(json!(plan))))
}

#[derive(Deserialize, Default)]
struct UpdatePlanRequest {
    name: Option<String>,
    description: Option<String>,
    price: Option<rust_decimal::Decimal>,
    #[serde(default)]
    period_days: Option<Option<i64>>,
    features: Option<Vec<String>>,
    active: Option<bool>,
}

async fn update_plan(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(plan_id): Path<String>,
    Json(req): Json<UpdatePlanRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = tenant_id(&headers)?;
    let plan = state
        .storage
        .update_plan(
            &tenant_id,
            &plan_id,
            PlanUpdate {
                name: req.name,
                description: req.description,
                price: req.price,
                period_days: req.period_days,
                features: req.features,
                active: req.active,
            },
        )
        .await
        .map_err(ApiError)?;
    Ok(Json(json!(plan)))
}

#[derive(Deserialize)]
struct CreatePaymentRequest {
    external_user_id: String,
    plan_id: String,
    network: String,
    sender_address: String,
}

async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreatePaymentRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let tenant_id = tenant_id(&headers)?;
    let network = Network::parse(&req.network)
        .ok_or_else(|| ApiError(PayhubError::InvalidNetwork(req.network.clone())))?;

    let placement = state
        .payment_engine
        .initiate_payment(&tenant_id, &req.external_user_id, &req.plan_id, network, &req.sender_address)
        .await
        .map_err(ApiError)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "payment_id": placement.payment_id,
            "receiver_address": placement.receiver_address,
            "amount": placement.amount.to_string(),
            "token": placement.token.as_str(),
            "network": placement.network.as_str(),
            "expires_at": placement.expires_at,
            "expires_in_seconds": placement.expires_in_seconds,
            "qr_code_data": placement.qr_code_data,
        })),
    ))
}

async fn confirm_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = tenant_id(&headers)?;
    let payment = state
        .payment_engine
        .confirm_payment_sent(&tenant_id, &payment_id)
        .await
        .map_err(ApiError)?;
    Ok(Json(json!(payment)))
}

async fn payment_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = tenant_id(&headers)?;
    let view = state
        .payment_engine
        .get_payment_status(&tenant_id, &payment_id)
        .await
        .map_err(ApiError)?;
    Ok(Json(json!({
        "payment": view.payment,
        "seconds_to_expire": view.seconds_to_expire,
        "explorer_url": view.explorer_url,
    })))
}

async fn payment_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserScopedQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = tenant_id(&headers)?;
    let history = state
        .payment_engine
        .get_payment_history(&tenant_id, &query.external_user_id, query.limit.unwrap_or(50))
        .await
        .map_err(ApiError)?;
    Ok(Json(json!(history)))
}

async fn cancel_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = tenant_id(&headers)?;
    let payment = state
        .payment_engine
        .cancel_payment(&tenant_id, &payment_id)
        .await
        .map_err(ApiError)?;
    Ok(Json(json!(payment)))
}

#[derive(Deserialize)]
struct ValidateAddressRequest {
    network: String,
    address: String,
}

async fn validate_address(Json(req): Json<ValidateAddressRequest>) -> ApiResult<Json<serde_json::Value>> {
    let network = Network::parse(&req.network)
        .ok_or_else(|| ApiError(PayhubError::InvalidNetwork(req.network.clone())))?;
    match address::validate_and_normalize(network, &req.address) {
        Ok(normalized) => Ok(Json(json!({"valid": true, "normalized": normalized}))),
        Err(e) => Ok(Json(json!({"valid": false, "reason": e.to_string()}))),
    }
}

#[derive(Deserialize)]
struct UserQuery {
    external_user_id: String,
}

async fn subscription_current(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = tenant_id(&headers)?;
    let subscription = state
        .subscriptions
        .current_subscription(&tenant_id, &query.external_user_id)
        .await
        .map_err(ApiError)?;
    let days_remaining = subscription.as_ref().and_then(|s| s.days_remaining(Utc::now()));
    Ok(Json(json!({
        "subscription": subscription,
        "days_remaining": days_remaining,
    })))
}

async fn subscription_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = tenant_id(&headers)?;
    let history = state
        .subscriptions
        .history(&tenant_id, &query.external_user_id)
        .await
        .map_err(ApiError)?;
    Ok(Json(json!(history)))
}

async fn subscription_active(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let tenant_id = tenant_id(&headers)?;
    let active = state
        .subscriptions
        .is_active(&tenant_id, &query.external_user_id)
        .await
        .map_err(ApiError)?;
    Ok(Json(json!({"active": active})))
}

async fn ofac_status(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let last_update = state.storage.last_ofac_update_log().await.map_err(ApiError)?;
    let total = state.storage.ofac_address_count().await.map_err(ApiError)?;
    let type_counts = state.storage.ofac_address_type_counts().await.map_err(ApiError)?;
    Ok(Json(json!({
        "last_update": last_update,
        "total_addresses": total,
        "last_update_success": last_update.as_ref().map(|l| l.success),
        "address_types": type_counts.into_iter().collect::<std::collections::HashMap<_, _>>(),
    })))
}

async fn ofac_check(State(state): State<AppState>, Path(address): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let result = state.ofac.check_address(&address).await.map_err(ApiError)?;
    Ok(Json(json!({
        "address": address,
        "is_sanctioned": result.is_sanctioned,
        "matches": result.matches,
        "checked_at": result.checked_at,
    })))
}

async fn ofac_update(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let log = state.ofac.refresh().await.map_err(ApiError)?;
    Ok(Json(json!(log)))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "failed to build metrics response").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use payhub_core::chain::ChainAdapters;
    use payhub_core::crypto::CryptoContext;
    use payhub_core::domain::Tenant;
    use payhub_core::monitor::Monitor;
    use payhub_core::ofac::OfacScreener;
    use payhub_core::payment::PaymentEngine;
    use payhub_core::subscription::SubscriptionEngine;
    use payhub_core::webhook::WebhookEngine;
    use payhub_storage_memory::MemoryStorage;
    use tower::ServiceExt;

    async fn test_app() -> (Router, std::sync::Arc<MemoryStorage>) {
        let storage = std::sync::Arc::new(MemoryStorage::new());
        storage
            .seed_tenant(Tenant {
                id: "tenant_1".to_string(),
                name: "Acme".to_string(),
                api_key_digest: "unused-in-tests".to_string(),
                webhook_url: None,
                webhook_secret: None,
                evm_receiver_address: Some("0x1111111111111111111111111111111111111111".to_string()),
                tron_receiver_address: Some("TLsV52sRDL79HXGGm9yzwKibb6BeruhUzy".to_string()),
                active: true,
            })
            .await;

        let dyn_storage: std::sync::Arc<dyn Storage> = storage.clone();
        let crypto = CryptoContext::new("test-session-secret-long-enough").unwrap();
        let adapters = ChainAdapters { arbitrum: None, ethereum: None, tron: None };
        let monitor = Monitor::new(dyn_storage.clone(), adapters);
        let ofac = Arc::new(OfacScreener::new(dyn_storage.clone()));
        let subscriptions = Arc::new(SubscriptionEngine::new(dyn_storage.clone()));
        let webhooks = Arc::new(WebhookEngine::new(dyn_storage.clone()));
        let payment_engine = Arc::new(PaymentEngine::new(
            dyn_storage.clone(),
            crypto,
            ofac.clone(),
            monitor.clone(),
            subscriptions.clone(),
            webhooks,
        ));

        let state = AppState { storage: dyn_storage, payment_engine, subscriptions, ofac, monitor };
        (build_router(state), storage)
    }

    #[tokio::test]
    async fn health_reports_ok_without_a_tenant_header() {
        let (app, _storage) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_plans_without_tenant_header_is_unauthorized() {
        let (app, _storage) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/plans").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_then_list_plan_round_trips() {
        let (app, _storage) = test_app().await;

        let create = Request::builder()
            .method("POST")
            .uri("/api/plans")
            .header("X-Tenant-Id", "tenant_1")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "plan_key": "pro",
                    "name": "Pro",
                    "price": "9.99",
                    "currency": "USDT",
                    "period_days": 30
                })
                .to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(create).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let list = Request::builder()
            .uri("/api/plans")
            .header("X-Tenant-Id", "tenant_1")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(list).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let plans: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(plans.as_array().unwrap().len(), 1);
        assert_eq!(plans[0]["plan_key"], "pro");
    }

    #[tokio::test]
    async fn create_payment_for_unknown_plan_is_bad_request() {
        let (app, _storage) = test_app().await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/payments")
            .header("X-Tenant-Id", "tenant_1")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "external_user_id": "user_1",
                    "plan_id": "plan_does_not_exist",
                    "network": "tron",
                    "sender_address": "TLsV52sRDL79HXGGm9yzwKibb6BeruhUzy"
                })
                .to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn validate_address_rejects_malformed_tron_address() {
        let (app, _storage) = test_app().await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/validate-address")
            .header("content-type", "application/json")
            .body(Body::from(json!({"network": "tron", "address": "not-an-address"}).to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["valid"], false);
    }

    #[tokio::test]
    async fn validate_address_rejects_unknown_network() {
        let (app, _storage) = test_app().await;

        let request = Request::builder()
            .method("POST")
            .uri("/api/validate-address")
            .header("content-type", "application/json")
            .body(Body::from(json!({"network": "dogecoin", "address": "x"}).to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn networks_lists_all_three_chains() {
        let (app, _storage) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/networks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let networks: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(networks.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn ofac_status_reports_zero_addresses_before_any_refresh() {
        let (app, _storage) = test_app().await;
        let response = app
            .oneshot(Request::builder().uri("/api/ofac/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["total_addresses"], 0);
    }
}

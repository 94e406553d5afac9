//! Route handlers
//!
//! Parameters come from the query string; missing or malformed ones yield
//! `invalid_request`.

use super::response::{ApiError, ApiResponse};
use super::AppState;
use crate::metrics;
use crate::users::NewUser;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T: Serialize>(result: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::result(result)))
}

#[derive(Debug, Deserialize)]
pub struct AddressQuery {
    pub address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NftPageQuery {
    pub address: Option<String>,
    pub page: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionsQuery {
    pub address: Option<String>,
    pub limit: Option<usize>,
    pub page: Option<usize>,
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(ApiError::invalid_request)
}

fn require_address(address: Option<String>) -> Result<String, ApiError> {
    match address.map(|a| a.trim().to_string()) {
        Some(address) if !address.is_empty() => Ok(address),
        _ => Err(ApiError::invalid_request("missing address")),
    }
}

fn address_param(q: Result<Query<AddressQuery>, QueryRejection>) -> Result<String, ApiError> {
    require_address(query(q)?.address)
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.ton.engine().store().stats().await {
        Ok(stats) => Json(serde_json::json!({ "status": "ok", "cache": stats })).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read cache");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "degraded" })),
            )
                .into_response()
        }
    }
}

pub async fn metrics_text() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_metrics(),
    )
}

pub async fn get_friendly_address(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AddressQuery>, QueryRejection>,
) -> ApiResult<String> {
    let address = address_param(q)?;
    ok(state.ton.friendly_address(&address).await?)
}

pub async fn get_raw_address(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AddressQuery>, QueryRejection>,
) -> ApiResult<String> {
    let address = address_param(q)?;
    ok(state.ton.raw_address(&address).await?)
}

pub async fn get_ton_price(State(state): State<Arc<AppState>>) -> ApiResult<f64> {
    ok(state.ton.ton_price().await?)
}

pub async fn get_address_type(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AddressQuery>, QueryRejection>,
) -> ApiResult<crate::ton::AddressType> {
    let address = address_param(q)?;
    ok(state.ton.address_type(&address).await?)
}

pub async fn get_wallet_info(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AddressQuery>, QueryRejection>,
) -> ApiResult<crate::ton::WalletInfo> {
    let address = address_param(q)?;
    ok(state.ton.wallet_info(&address).await?)
}

pub async fn get_transaction_info(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AddressQuery>, QueryRejection>,
) -> ApiResult<serde_json::Value> {
    let event_id = address_param(q)?;
    ok(state.ton.transaction_info(&event_id).await?)
}

pub async fn get_jetton_info(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AddressQuery>, QueryRejection>,
) -> ApiResult<crate::ton::JettonSummary> {
    let address = address_param(q)?;
    ok(state.ton.jetton_info(&address).await?)
}

pub async fn get_nft_info(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AddressQuery>, QueryRejection>,
) -> ApiResult<crate::ton::NftSummary> {
    let address = address_param(q)?;
    ok(state.ton.nft_info(&address).await?)
}

pub async fn get_nft_info_by_owner(
    State(state): State<Arc<AppState>>,
    q: Result<Query<NftPageQuery>, QueryRejection>,
) -> ApiResult<crate::ton::OwnedNft> {
    let q = query(q)?;
    let address = require_address(q.address)?;
    ok(state
        .ton
        .nft_by_owner(&address, q.page.unwrap_or(0))
        .await?)
}

pub async fn get_transactions(
    State(state): State<Arc<AppState>>,
    q: Result<Query<TransactionsQuery>, QueryRejection>,
) -> ApiResult<crate::ton::TransactionsPage> {
    let q = query(q)?;
    let address = require_address(q.address)?;

    let defaults = &state.pagination;
    let limit = q.limit.unwrap_or(defaults.limit);
    let page = q.page.unwrap_or(defaults.page);

    if limit == 0 || limit > defaults.max_limit {
        return Err(ApiError::invalid_request(format!(
            "limit must be between 1 and {}",
            defaults.max_limit
        )));
    }

    ok(state.ton.transactions(&address, limit, page).await?)
}

pub async fn get_jettons(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AddressQuery>, QueryRejection>,
) -> ApiResult<Vec<serde_json::Value>> {
    let address = address_param(q)?;
    ok(state.ton.jettons(&address).await?)
}

pub async fn get_nfts(
    State(state): State<Arc<AppState>>,
    q: Result<Query<AddressQuery>, QueryRejection>,
) -> ApiResult<Vec<serde_json::Value>> {
    let address = address_param(q)?;
    ok(state.ton.nfts(&address).await?)
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewUser>, JsonRejection>,
) -> ApiResult<crate::users::User> {
    let Json(user) = body.map_err(ApiError::invalid_request)?;
    ok(state.users.create(user)?)
}

pub async fn list_users(State(state): State<Arc<AppState>>) -> ApiResult<Vec<crate::users::User>> {
    ok(state.users.list()?)
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    id: Result<Path<i64>, PathRejection>,
) -> ApiResult<crate::users::User> {
    let Path(id) = id.map_err(ApiError::invalid_request)?;
    ok(state.users.get(id)?)
}

pub async fn get_user_by_user_id(
    State(state): State<Arc<AppState>>,
    user_id: Result<Path<i64>, PathRejection>,
) -> ApiResult<crate::users::User> {
    let Path(user_id) = user_id.map_err(ApiError::invalid_request)?;
    ok(state.users.get_by_user_id(user_id)?)
}

// Admin routes: sweep batches and custodial address listing
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::security::require_admin;
use super::AppState;
use crate::model::CustodialAddressView;
use crate::sweeper::SweepStatus;

#[derive(Debug, Deserialize)]
pub struct SweepRequest {
    #[serde(default)]
    pub address_ids: Vec<String>,
}

/// Reject the whole batch on empty lists, blank ids or too many ids
pub fn validate_batch(ids: &[String], max_batch: usize) -> ApiResult<Vec<String>> {
    if ids.is_empty() {
        return Err(ApiError::bad_request("address_ids must not be empty"));
    }
    if ids.len() > max_batch {
        return Err(ApiError::bad_request(format!(
            "too many address_ids: {} (max {})",
            ids.len(),
            max_batch
        )));
    }
    let mut out = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        let id = id.trim();
        if id.is_empty() {
            return Err(ApiError::bad_request(format!("address_ids[{}] is blank", i)));
        }
        out.push(id.to_string());
    }
    Ok(out)
}

pub async fn sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SweepRequest>,
) -> ApiResult<Json<Value>> {
    require_admin(state.config.server.admin_token.as_deref(), &headers)?;
    let ids = validate_batch(&req.address_ids, state.config.server.max_batch)?;

    let results = state.sweeper.sweep_addresses(&ids).await;
    let swept = results
        .iter()
        .filter(|r| r.status == SweepStatus::Success)
        .count();

    Ok(Json(json!({
        "ok": true,
        "requested": ids.len(),
        "swept": swept,
        "results": results,
    })))
}

pub async fn list_addresses(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    require_admin(state.config.server.admin_token.as_deref(), &headers)?;
    let addresses: Vec<CustodialAddressView> = state
        .store
        .list_addresses()?
        .iter()
        .map(CustodialAddressView::from)
        .collect();
    Ok(Json(json!({ "ok": true, "count": addresses.len(), "addresses": addresses })))
}

// Deposit-side routes: address issuance, explicit checks, history and balance
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::{ApiError, ApiResult};
use super::AppState;
use crate::chain::units::ledger_to_string;
use crate::chain::{fmt_address, generate_keypair};
use crate::model::{CustodialAddressView, SecretKey};

#[derive(Debug, Deserialize)]
pub struct DepositAddressRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub network: String,
}

fn required(field: &str, value: &str) -> ApiResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ApiError::bad_request(format!("{} must not be empty", field)));
    }
    Ok(v.to_string())
}

pub async fn deposit_address(
    State(state): State<AppState>,
    Json(req): Json<DepositAddressRequest>,
) -> ApiResult<Json<Value>> {
    let user_id = required("user_id", &req.user_id)?;
    let currency = required("currency", &req.currency)?.to_ascii_lowercase();
    let network = required("network", &req.network)?.to_ascii_lowercase();

    let registry = &state.config.registry;
    let cur = registry
        .currency(&currency)
        .filter(|c| c.active)
        .ok_or_else(|| ApiError::bad_request(format!("unknown or inactive currency {}", currency)))?;
    let net = cur
        .network(&network)
        .filter(|n| n.active)
        .ok_or_else(|| {
            ApiError::bad_request(format!("unknown or inactive network {} for {}", network, currency))
        })?;

    let (record, created) = state
        .store
        .get_or_create_address(&user_id, &currency, &network, || {
            let (address, secret) = generate_keypair();
            (fmt_address(&address), SecretKey::new(secret))
        })?;

    Ok(Json(json!({
        "ok": true,
        "created": created,
        "symbol": cur.symbol,
        "kind": net.kind.as_str(),
        "address": CustodialAddressView::from(&record),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub address_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

pub async fn check_deposits(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> ApiResult<Json<Value>> {
    let results = match (req.address_id.as_deref(), req.user_id.as_deref()) {
        (Some(id), None) => {
            let id = required("address_id", id)?;
            if state.store.get_address(&id)?.is_none() {
                return Err(ApiError::NotFound(format!("custodial address {} not found", id)));
            }
            state.watcher.check_many(&[id]).await
        }
        (None, Some(user)) => {
            let user = required("user_id", user)?;
            state.watcher.check_user(&user).await?
        }
        _ => {
            return Err(ApiError::bad_request(
                "provide exactly one of address_id or user_id",
            ))
        }
    };

    let credited: usize = results.iter().map(|r| r.deposits.len()).sum();
    Ok(Json(json!({ "ok": true, "new_deposits": credited, "results": results })))
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    #[serde(default)]
    pub user_id: String,
}

pub async fn list_deposits(
    State(state): State<AppState>,
    Query(q): Query<UserQuery>,
) -> ApiResult<Json<Value>> {
    let user_id = required("user_id", &q.user_id)?;
    let deposits = state.store.deposits_for_user(&user_id)?;
    Ok(Json(json!({ "ok": true, "user_id": user_id, "deposits": deposits })))
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user_id = required("user_id", &user_id)?;
    let units = state.store.balance(&user_id)?;
    Ok(Json(json!({
        "ok": true,
        "user_id": user_id,
        "balance": ledger_to_string(units),
        "balance_units": units.to_string(),
    })))
}

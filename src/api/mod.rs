pub mod deposits;
pub mod error;
pub mod security;
pub mod sweep;

use axum::http::{header, HeaderValue};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{extract::State, Json, Router};
use std::sync::Arc;

use crate::chain::ChainConnector;
use crate::config::ResolvedConfig;
use crate::notify::DepositNotifier;
use crate::store::Store;
use crate::sweeper::BalanceSweeper;
use crate::watcher::DepositWatcher;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub config: Arc<ResolvedConfig>,
    pub watcher: Arc<DepositWatcher>,
    pub sweeper: Arc<BalanceSweeper>,
}

impl AppState {
    /// Wire the watcher and sweeper over one store and one chain connector
    pub fn new(store: Store, config: Arc<ResolvedConfig>, connector: Arc<dyn ChainConnector>) -> Self {
        let notifier = DepositNotifier::new(config.server.notify_url.clone());
        let watcher = Arc::new(DepositWatcher::new(
            store.clone(),
            config.clone(),
            connector.clone(),
            notifier,
        ));
        let sweeper = Arc::new(BalanceSweeper::new(store.clone(), config.clone(), connector));
        Self {
            store,
            config,
            watcher,
            sweeper,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/livez", get(livez))
        .route("/health", get(health))
        .route("/metrics.prom", get(metrics_prom))
        .route("/api/crypto/deposit-address", post(deposits::deposit_address))
        .route("/api/crypto/deposits/check", post(deposits::check_deposits))
        .route("/api/crypto/deposits", get(deposits::list_deposits))
        .route("/api/balance/:user_id", get(deposits::get_balance))
        .merge(admin_router())
        .with_state(state)
}

// Admin surface; every handler checks X-Admin-Token itself
fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/crypto/sweep", post(sweep::sweep))
        .route("/api/admin/crypto/addresses", get(sweep::list_addresses))
}

async fn livez() -> &'static str {
    "ok"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let currencies: Vec<&str> = state
        .config
        .registry
        .currencies()
        .filter(|c| c.active)
        .map(|c| c.id.as_str())
        .collect();
    Json(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "currencies": currencies,
        "master_wallets": state.config.master_wallets.values().filter(|w| w.active).count(),
        "poller_enabled": state.config.watcher.poll_enabled,
        "parked_addresses": state.watcher.backoff().parked_count(),
    }))
}

async fn metrics_prom() -> impl IntoResponse {
    let headers = [(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    )];
    (headers, crate::metrics::render())
}

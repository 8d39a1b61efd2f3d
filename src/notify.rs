//! Fire-and-forget webhook for credited deposits.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::model::DepositRecord;

static HTTP: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(8))
        .build()
        .expect("build http client")
});

/// Posts each newly credited deposit as JSON to a configured URL.
/// Delivery failures are logged and never affect the ledger.
#[derive(Debug, Clone, Default)]
pub struct DepositNotifier {
    url: Option<String>,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl DepositNotifier {
    pub fn new(url: Option<String>) -> Self {
        Self {
            url: url.filter(|u| !u.trim().is_empty()),
            in_flight: Arc::default(),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    pub fn deposit_credited(&self, record: &DepositRecord) {
        let Some(url) = self.url.clone() else {
            return;
        };
        let body = serde_json::json!({ "event": "deposit.credited", "deposit": record });
        let tx_hash = record.tx_hash.clone();
        let handle = tokio::spawn(async move {
            match HTTP.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(%tx_hash, "deposit notification delivered");
                }
                Ok(resp) => {
                    tracing::warn!(%tx_hash, status = %resp.status(), "deposit notification rejected");
                }
                Err(e) => {
                    tracing::warn!(%tx_hash, error = %e, "deposit notification failed");
                }
            }
        });
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// Wait for every notification sent so far. One-shot commands call this
    /// before the runtime shuts down.
    pub async fn drain(&self) {
        let pending = std::mem::take(&mut *self.in_flight.lock());
        for handle in pending {
            let _ = handle.await;
        }
    }
}

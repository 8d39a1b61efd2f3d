// Background deposit poller with per-address backoff
//
// Disabled unless `watcher.poll_enabled` is set. Each round checks every
// active custodial address on a token network that is due. Failures push the
// next attempt out exponentially; after `max_attempts` consecutive failures the
// address is parked until an explicit check succeeds.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{NetworkKind, WatcherCfg};
use crate::watcher::DepositWatcher;

#[derive(Debug, Clone, Copy)]
pub struct BackoffState {
    pub fail_count: u32,
    pub next_retry_at: Instant,
    pub parked: bool,
}

#[derive(Debug)]
pub struct PollBackoff {
    poll_secs: u64,
    max_backoff_secs: u64,
    max_attempts: u32,
    state: DashMap<String, BackoffState>,
}

impl PollBackoff {
    pub fn new(poll_secs: u64, max_backoff_secs: u64, max_attempts: u32) -> Self {
        Self {
            poll_secs: poll_secs.max(1),
            max_backoff_secs: max_backoff_secs.max(1),
            max_attempts: max_attempts.max(1),
            state: DashMap::new(),
        }
    }

    pub fn from_cfg(cfg: &WatcherCfg) -> Self {
        Self::new(cfg.poll_secs, cfg.max_backoff_secs, cfg.max_attempts)
    }

    /// poll_secs * 2^fail_count, capped
    pub fn delay_for(&self, fail_count: u32) -> Duration {
        let factor = 1u64.checked_shl(fail_count.min(63)).unwrap_or(u64::MAX);
        let secs = self.poll_secs.saturating_mul(factor).min(self.max_backoff_secs);
        Duration::from_secs(secs)
    }

    pub fn is_due(&self, address_id: &str, now: Instant) -> bool {
        match self.state.get(address_id) {
            Some(s) => !s.parked && now >= s.next_retry_at,
            None => true,
        }
    }

    pub fn record_failure(&self, address_id: &str, now: Instant) -> BackoffState {
        let mut entry = self
            .state
            .entry(address_id.to_string())
            .or_insert(BackoffState {
                fail_count: 0,
                next_retry_at: now,
                parked: false,
            });
        entry.fail_count = entry.fail_count.saturating_add(1);
        entry.next_retry_at = now + self.delay_for(entry.fail_count);
        if entry.fail_count >= self.max_attempts {
            entry.parked = true;
        }
        *entry
    }

    /// Clears failures and un-parks
    pub fn record_success(&self, address_id: &str) {
        self.state.remove(address_id);
    }

    pub fn is_parked(&self, address_id: &str) -> bool {
        self.state.get(address_id).map(|s| s.parked).unwrap_or(false)
    }

    pub fn fail_count(&self, address_id: &str) -> u32 {
        self.state.get(address_id).map(|s| s.fail_count).unwrap_or(0)
    }

    pub fn parked_count(&self) -> usize {
        self.state.iter().filter(|s| s.parked).count()
    }
}

/// One polling round over every due address
pub async fn poll_once(watcher: &DepositWatcher) {
    let addresses = match watcher.store().list_addresses() {
        Ok(list) => list,
        Err(e) => {
            warn!(error = %e, "poller: cannot list custodial addresses");
            return;
        }
    };

    let backoff = watcher.backoff();
    let lookback = watcher.config().watcher.lookback_blocks;

    for addr in addresses.iter().filter(|a| a.active) {
        let is_token = watcher
            .config()
            .registry
            .network(&addr.currency, &addr.network)
            .map(|n| matches!(n.kind, NetworkKind::Token(_)) && n.active)
            .unwrap_or(false);
        if !is_token || !backoff.is_due(&addr.id, Instant::now()) {
            continue;
        }

        match watcher.check_address(addr, lookback).await {
            Ok(found) => {
                backoff.record_success(&addr.id);
                if !found.is_empty() {
                    info!(address_id = %addr.id, count = found.len(), "poller: new deposits");
                }
            }
            Err(e) => {
                let state = backoff.record_failure(&addr.id, Instant::now());
                if state.parked {
                    warn!(address_id = %addr.id, fail_count = state.fail_count, error = %e, "poller: address parked");
                } else {
                    debug!(address_id = %addr.id, fail_count = state.fail_count, error = %e, "poller: check failed, backing off");
                }
            }
        }
    }
}

pub fn spawn_poller(watcher: Arc<DepositWatcher>) -> JoinHandle<()> {
    let every = Duration::from_secs(watcher.config().watcher.poll_secs.max(1));
    info!(poll_secs = every.as_secs(), "deposit poller started");
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            poll_once(&watcher).await;
        }
    })
}

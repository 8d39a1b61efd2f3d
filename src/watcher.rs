//! Deposit watcher
//!
//! Scans ERC-20 `Transfer` logs addressed to a custodial address, records each
//! unseen transaction hash and credits the owner's ledger balance in the same
//! storage transaction. Per address a scan cursor remembers the last block
//! fully scanned so consecutive checks never re-read the same range.

use chrono::{TimeZone, Utc};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::units::{
    below_minimum, decimal_to_f64, format_amount, to_ledger_units, LEDGER_DECIMALS,
};
use crate::chain::{fmt_address, fmt_hash, ChainConnector, ChainError, TransferLog};
use crate::config::{NetworkConfig, NetworkKind, ResolvedConfig};
use crate::metrics;
use crate::model::{CustodialAddress, DepositRecord, DepositStatus};
use crate::notify::DepositNotifier;
use crate::poller::PollBackoff;
use crate::store::{RecordOutcome, Store};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("custodial address not found: {0}")]
    AddressNotFound(String),
    #[error("network config not found: {currency}/{network}")]
    UnknownNetwork { currency: String, network: String },
    #[error("network {0} is inactive")]
    NetworkInactive(String),
    #[error("missing rpc url for network {0}")]
    MissingRpcUrl(String),
    #[error("invalid custodial address {0}")]
    InvalidAddress(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl WatchError {
    /// Configuration gaps are skipped, everything else is an error
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            WatchError::UnknownNetwork { .. }
                | WatchError::NetworkInactive(_)
                | WatchError::MissingRpcUrl(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchStatus {
    Checked,
    Skipped,
    Error,
}

/// Result of checking one address in a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchOutcome {
    pub address_id: String,
    pub status: WatchStatus,
    pub message: String,
    pub deposits: Vec<DepositRecord>,
}

pub struct DepositWatcher {
    store: Store,
    config: Arc<ResolvedConfig>,
    connector: Arc<dyn ChainConnector>,
    notifier: DepositNotifier,
    backoff: PollBackoff,
}

impl DepositWatcher {
    pub fn new(
        store: Store,
        config: Arc<ResolvedConfig>,
        connector: Arc<dyn ChainConnector>,
        notifier: DepositNotifier,
    ) -> Self {
        let backoff = PollBackoff::from_cfg(&config.watcher);
        Self {
            store,
            config,
            connector,
            notifier,
            backoff,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn backoff(&self) -> &PollBackoff {
        &self.backoff
    }

    pub fn notifier(&self) -> &DepositNotifier {
        &self.notifier
    }

    /// Scan one custodial address and credit every new transfer found.
    ///
    /// Returns the records created by this call. On error nothing about the
    /// address changes; in particular the scan cursor stays where it was.
    pub async fn check_address(
        &self,
        address: &CustodialAddress,
        lookback_blocks: u64,
    ) -> Result<Vec<DepositRecord>, WatchError> {
        let net = self
            .config
            .registry
            .network(&address.currency, &address.network)
            .ok_or_else(|| WatchError::UnknownNetwork {
                currency: address.currency.clone(),
                network: address.network.clone(),
            })?;
        if !net.active {
            return Err(WatchError::NetworkInactive(net.id.clone()));
        }
        let price = self
            .config
            .registry
            .currency(&address.currency)
            .map(|c| (c.usd_price, c.price_units))
            .unwrap_or((1.0, 10u128.pow(LEDGER_DECIMALS)));

        let token = match net.kind {
            NetworkKind::Token(token) => token,
            NetworkKind::Native => {
                debug!(address_id = %address.id, network = %net.id, "native network has no transfer logs to scan");
                return Ok(Vec::new());
            }
        };

        let rpc_url = net
            .rpc_url()
            .ok_or_else(|| WatchError::MissingRpcUrl(net.id.clone()))?;
        let recipient: Address = address
            .address
            .parse()
            .map_err(|_| WatchError::InvalidAddress(address.address.clone()))?;

        let client = self.connector.connect(rpc_url)?;
        let head = client.block_number().await?;

        let from = match self.store.scan_cursor(&address.id)? {
            Some(cursor) => cursor.saturating_add(1),
            None => head.saturating_sub(lookback_blocks),
        };
        if from > head {
            debug!(address_id = %address.id, from, head, "no new blocks");
            return Ok(Vec::new());
        }
        let span = self.config.watcher.max_scan_blocks.max(1);
        let to = head.min(from.saturating_add(span - 1));

        let logs = client.transfer_logs(token, recipient, from, to).await?;

        let mut seen = HashSet::new();
        let mut fresh: Vec<TransferLog> = Vec::new();
        for log in logs {
            let hash = fmt_hash(&log.tx_hash);
            if !seen.insert(hash.clone()) || self.store.deposit_exists(&hash)? {
                continue;
            }
            fresh.push(log);
        }

        let mut created = Vec::new();
        if !fresh.is_empty() {
            let decimals = client.token_decimals(token).await? as u32;

            let mut records = Vec::with_capacity(fresh.len());
            for log in &fresh {
                records.push(self.build_record(address, net, price, decimals, log)?);
            }

            for record in records {
                match self.store.record_deposit(&record)? {
                    RecordOutcome::Inserted => {
                        if record.is_credited() {
                            info!(
                                address_id = %address.id,
                                user_id = %record.user_id,
                                tx_hash = %record.tx_hash,
                                amount = %record.amount,
                                currency = %record.currency,
                                network = %record.network,
                                "deposit credited"
                            );
                            metrics::deposit_credited(&record.currency, &record.network);
                            self.notifier.deposit_credited(&record);
                        } else {
                            warn!(
                                address_id = %address.id,
                                tx_hash = %record.tx_hash,
                                amount = %record.amount,
                                status = record.status.as_str(),
                                note = record.note.as_deref().unwrap_or(""),
                                "deposit recorded without credit"
                            );
                        }
                        created.push(record);
                    }
                    RecordOutcome::AlreadyExists => {
                        debug!(tx_hash = %record.tx_hash, "deposit already recorded by a concurrent check");
                    }
                }
            }
        }

        self.store.advance_scan_cursor(&address.id, to)?;
        if created.iter().any(DepositRecord::is_credited) {
            if let Err(e) = self.store.touch_address(&address.id, None) {
                warn!(address_id = %address.id, error = %e, "deposit credited but address metadata not updated");
            }
        }

        debug!(address_id = %address.id, from, to, new = created.len(), "address scanned");
        Ok(created)
    }

    fn build_record(
        &self,
        address: &CustodialAddress,
        net: &NetworkConfig,
        (usd_price, price_units): (f64, u128),
        decimals: u32,
        log: &TransferLog,
    ) -> Result<DepositRecord, WatchError> {
        let amount = format_amount(log.value, decimals)?;
        let amount_usd = decimal_to_f64(&amount) * usd_price;

        let (status, credited_units, note) = if log.value.is_zero() {
            (DepositStatus::Failed, 0, Some("zero-value transfer".to_string()))
        } else if below_minimum(log.value, decimals, net.min_deposit)? {
            (
                DepositStatus::Failed,
                0,
                Some(format!("below minimum deposit of {}", net.min_deposit)),
            )
        } else {
            (
                DepositStatus::Completed,
                to_ledger_units(log.value, decimals, price_units)?,
                None,
            )
        };

        Ok(DepositRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: address.user_id.clone(),
            currency: address.currency.clone(),
            network: address.network.clone(),
            amount,
            raw_amount: log.value.to_string(),
            amount_usd,
            credited_units,
            address: address.address.clone(),
            from_address: fmt_address(&log.from),
            tx_hash: fmt_hash(&log.tx_hash),
            block_number: log.block_number,
            block_timestamp: log
                .block_timestamp
                .and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single()),
            status,
            confirmations: net.confirmations,
            required_confirmations: net.confirmations,
            fee: net.fee,
            note,
            created_at: Utc::now(),
        })
    }

    /// Load an address by id and check it with the configured lookback
    pub async fn check_by_id(&self, address_id: &str) -> Result<Vec<DepositRecord>, WatchError> {
        let address = self
            .store
            .get_address(address_id)?
            .ok_or_else(|| WatchError::AddressNotFound(address_id.to_string()))?;
        self.check_address(&address, self.config.watcher.lookback_blocks)
            .await
    }

    /// Explicit check of several addresses. One failure never stops the rest,
    /// and a success clears any poller backoff for that address.
    pub async fn check_many(&self, address_ids: &[String]) -> Vec<WatchOutcome> {
        let mut out = Vec::with_capacity(address_ids.len());
        for id in address_ids {
            let address = match self.store.get_address(id) {
                Ok(Some(a)) => a,
                Ok(None) => {
                    out.push(outcome(id, WatchStatus::Error, "custodial address not found".into()));
                    continue;
                }
                Err(e) => {
                    out.push(outcome(id, WatchStatus::Error, format!("storage: {}", e)));
                    continue;
                }
            };
            out.push(self.check_loaded(&address).await);
        }
        out
    }

    /// Explicit check of every custodial address a user owns
    pub async fn check_user(&self, user_id: &str) -> anyhow::Result<Vec<WatchOutcome>> {
        let addresses = self.store.addresses_for_user(user_id)?;
        let mut out = Vec::with_capacity(addresses.len());
        for address in &addresses {
            out.push(self.check_loaded(address).await);
        }
        Ok(out)
    }

    async fn check_loaded(&self, address: &CustodialAddress) -> WatchOutcome {
        if !address.active {
            return outcome(&address.id, WatchStatus::Skipped, "address inactive".into());
        }
        match self
            .check_address(address, self.config.watcher.lookback_blocks)
            .await
        {
            Ok(deposits) => {
                self.backoff.record_success(&address.id);
                WatchOutcome {
                    address_id: address.id.clone(),
                    status: WatchStatus::Checked,
                    message: format!("{} new deposit(s)", deposits.len()),
                    deposits,
                }
            }
            Err(e) if e.is_skip() => {
                debug!(address_id = %address.id, reason = %e, "address skipped");
                outcome(&address.id, WatchStatus::Skipped, e.to_string())
            }
            Err(e) => {
                warn!(address_id = %address.id, network = %address.network, error = %e, "deposit check failed");
                metrics::watch_error(&address.network);
                outcome(&address.id, WatchStatus::Error, e.to_string())
            }
        }
    }
}

fn outcome(address_id: &str, status: WatchStatus, message: String) -> WatchOutcome {
    WatchOutcome {
        address_id: address_id.to_string(),
        status,
        message,
        deposits: Vec::new(),
    }
}

//! Balance sweeper: moves custodial balances to the network's master wallet.

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::chain::units::format_amount;
use crate::chain::{fmt_hash, ChainClient, ChainConnector, NATIVE_DECIMALS};
use crate::config::{NetworkKind, ResolvedConfig};
use crate::metrics;
use crate::model::CustodialAddress;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    Success,
    Skipped,
    NeedGas,
    Error,
}

impl SweepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepStatus::Success => "success",
            SweepStatus::Skipped => "skipped",
            SweepStatus::NeedGas => "need_gas",
            SweepStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepOutcome {
    pub id: String,
    pub address: Option<String>,
    pub status: SweepStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    /// Amount sent, decimal string in the swept asset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    /// Native coin missing to pay for gas, decimal string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<String>,
}

impl SweepOutcome {
    fn new(id: &str, address: Option<&str>, status: SweepStatus, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            address: address.map(str::to_string),
            status,
            message: message.into(),
            tx_hash: None,
            amount: None,
            shortfall: None,
        }
    }
}

/// What to do with one address given its balances
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepPlan {
    /// Nothing to move
    Skip,
    /// Not enough native coin to pay for the transfer
    NeedGas { shortfall: U256 },
    SendToken { amount: U256 },
    SendNative { amount: U256 },
    /// Native balance covers gas but leaves nothing to send
    NothingAfterGas,
}

/// Decide the sweep action. `balance` is the swept asset's balance (equal to
/// `native_balance` on native networks).
pub fn plan_sweep(kind: &NetworkKind, balance: U256, native_balance: U256, gas_cost: U256) -> SweepPlan {
    if balance.is_zero() {
        return SweepPlan::Skip;
    }
    if native_balance < gas_cost {
        return SweepPlan::NeedGas {
            shortfall: gas_cost - native_balance,
        };
    }
    match kind {
        NetworkKind::Token(_) => SweepPlan::SendToken { amount: balance },
        NetworkKind::Native => {
            let remainder = balance.saturating_sub(gas_cost);
            if remainder.is_zero() {
                SweepPlan::NothingAfterGas
            } else {
                SweepPlan::SendNative { amount: remainder }
            }
        }
    }
}

pub struct BalanceSweeper {
    store: Store,
    config: Arc<ResolvedConfig>,
    connector: Arc<dyn ChainConnector>,
}

impl BalanceSweeper {
    pub fn new(store: Store, config: Arc<ResolvedConfig>, connector: Arc<dyn ChainConnector>) -> Self {
        Self {
            store,
            config,
            connector,
        }
    }

    /// Sweep each address independently; output has the input's length and order
    pub async fn sweep_addresses(&self, address_ids: &[String]) -> Vec<SweepOutcome> {
        let mut out = Vec::with_capacity(address_ids.len());
        for id in address_ids {
            let outcome = self.sweep_one(id).await;
            metrics::sweep_outcome(outcome.status.as_str());
            match outcome.status {
                SweepStatus::Success => info!(
                    address_id = %outcome.id,
                    tx_hash = outcome.tx_hash.as_deref().unwrap_or(""),
                    amount = outcome.amount.as_deref().unwrap_or(""),
                    "sweep broadcast"
                ),
                SweepStatus::Error => warn!(address_id = %outcome.id, message = %outcome.message, "sweep failed"),
                status => info!(address_id = %outcome.id, status = status.as_str(), message = %outcome.message, "sweep not sent"),
            }
            out.push(outcome);
        }
        out
    }

    async fn sweep_one(&self, id: &str) -> SweepOutcome {
        let address = match self.store.get_address(id) {
            Ok(Some(a)) => a,
            Ok(None) => return SweepOutcome::new(id, None, SweepStatus::Error, "custodial address not found"),
            Err(e) => return SweepOutcome::new(id, None, SweepStatus::Error, format!("storage: {}", e)),
        };
        let shown = Some(address.address.as_str());

        let Some(net) = self.config.registry.network(&address.currency, &address.network) else {
            return SweepOutcome::new(id, shown, SweepStatus::Error, "network config not found");
        };
        let Some(master) = self.config.master_wallet(&net.id) else {
            return SweepOutcome::new(id, shown, SweepStatus::Error, "no active master wallet");
        };
        let Some(rpc_url) = net.rpc_url() else {
            return SweepOutcome::new(id, shown, SweepStatus::Error, "missing rpc url");
        };

        let client = match self.connector.connect(rpc_url) {
            Ok(c) => c,
            Err(e) => return SweepOutcome::new(id, shown, SweepStatus::Error, e.to_string()),
        };

        let gas_limit = match net.kind {
            NetworkKind::Token(_) => self.config.sweeper.token_gas_limit,
            NetworkKind::Native => self.config.sweeper.native_gas_limit,
        };

        match self
            .execute(client.as_ref(), &address, net.kind, master.address, gas_limit)
            .await
        {
            Ok(outcome) => outcome,
            Err(message) => SweepOutcome::new(id, shown, SweepStatus::Error, message),
        }
    }

    async fn execute(
        &self,
        client: &dyn ChainClient,
        address: &CustodialAddress,
        kind: NetworkKind,
        destination: Address,
        gas_limit: u64,
    ) -> Result<SweepOutcome, String> {
        let owner: Address = address
            .address
            .parse()
            .map_err(|_| format!("invalid custodial address {}", address.address))?;
        let shown = Some(address.address.as_str());

        let native_balance = client.native_balance(owner).await.map_err(|e| e.to_string())?;
        let balance = match kind {
            NetworkKind::Token(token) => client
                .token_balance(token, owner)
                .await
                .map_err(|e| e.to_string())?,
            NetworkKind::Native => native_balance,
        };

        if balance.is_zero() {
            return Ok(SweepOutcome::new(&address.id, shown, SweepStatus::Skipped, "zero balance"));
        }

        // resolved before anything is sent
        let decimals = match kind {
            NetworkKind::Token(token) => client
                .token_decimals(token)
                .await
                .map(u32::from)
                .map_err(|e| format!("token decimals unavailable: {}", e))?,
            NetworkKind::Native => NATIVE_DECIMALS,
        };

        let gas_price = client.gas_price().await.map_err(|e| e.to_string())?;
        let gas_cost = gas_price
            .checked_mul(U256::from(gas_limit))
            .ok_or_else(|| "gas cost overflow".to_string())?;

        let plan = plan_sweep(&kind, balance, native_balance, gas_cost);
        let (tx_hash, amount) = match (plan, kind) {
            (SweepPlan::Skip, _) => {
                return Ok(SweepOutcome::new(&address.id, shown, SweepStatus::Skipped, "zero balance"));
            }
            (SweepPlan::NeedGas { shortfall }, _) => {
                let shortfall_s = native_string(shortfall);
                let mut outcome = SweepOutcome::new(
                    &address.id,
                    shown,
                    SweepStatus::NeedGas,
                    format!(
                        "insufficient native balance for gas: need {}, have {}",
                        native_string(gas_cost),
                        native_string(native_balance)
                    ),
                );
                outcome.shortfall = Some(shortfall_s);
                return Ok(outcome);
            }
            (SweepPlan::NothingAfterGas, _) => {
                return Err("balance does not exceed gas cost".to_string());
            }
            (SweepPlan::SendToken { amount }, NetworkKind::Token(token)) => {
                let hash = client
                    .send_token(
                        address.private_key.expose(),
                        token,
                        destination,
                        amount,
                        gas_limit,
                        gas_price,
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                (hash, amount)
            }
            (SweepPlan::SendNative { amount }, _) => {
                let hash = client
                    .send_native(address.private_key.expose(), destination, amount, gas_limit, gas_price)
                    .await
                    .map_err(|e| e.to_string())?;
                (hash, amount)
            }
            (SweepPlan::SendToken { .. }, NetworkKind::Native) => {
                return Err("token transfer planned on a native network".to_string());
            }
        };

        let amount_s = format_amount(amount, decimals).unwrap_or_else(|_| amount.to_string());
        let balance_s = format_amount(balance, decimals).unwrap_or_else(|_| balance.to_string());

        if let Err(e) = self.store.touch_address(&address.id, Some(balance_s)) {
            warn!(address_id = %address.id, error = %e, "sweep sent but address metadata not updated");
        }

        let mut outcome = SweepOutcome::new(&address.id, shown, SweepStatus::Success, "transfer broadcast");
        outcome.tx_hash = Some(fmt_hash(&tx_hash));
        outcome.amount = Some(amount_s);
        Ok(outcome)
    }
}

fn native_string(wei: U256) -> String {
    format_amount(wei, NATIVE_DECIMALS).unwrap_or_else(|_| wei.to_string())
}

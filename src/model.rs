//! Persistent records shared by the watcher, the sweeper and the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hex private key of a custodial address. Never printed, never returned by the API.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Deposit address held on behalf of one user for one (currency, network)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodialAddress {
    pub id: String,
    pub user_id: String,
    pub currency: String,
    pub network: String,
    /// Lowercase 0x-prefixed
    pub address: String,
    pub private_key: SecretKey,
    pub active: bool,
    /// Last balance observed on chain, decimal string
    pub last_balance: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Public projection of a [`CustodialAddress`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodialAddressView {
    pub id: String,
    pub user_id: String,
    pub currency: String,
    pub network: String,
    pub address: String,
    pub active: bool,
    pub last_balance: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&CustodialAddress> for CustodialAddressView {
    fn from(a: &CustodialAddress) -> Self {
        Self {
            id: a.id.clone(),
            user_id: a.user_id.clone(),
            currency: a.currency.clone(),
            network: a.network.clone(),
            address: a.address.clone(),
            active: a.active,
            last_balance: a.last_balance.clone(),
            last_used_at: a.last_used_at,
            created_at: a.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    Pending,
    Confirming,
    Completed,
    Failed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Confirming => "confirming",
            DepositStatus::Completed => "completed",
            DepositStatus::Failed => "failed",
        }
    }
}

/// One on-chain transfer reconciled into the ledger. Keyed by `tx_hash`; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DepositRecord {
    pub id: String,
    pub user_id: String,
    pub currency: String,
    pub network: String,
    /// Token amount, decimal string
    pub amount: String,
    /// Token amount in the contract's smallest unit
    pub raw_amount: String,
    pub amount_usd: f64,
    /// Ledger units credited to the user (0 when not credited)
    #[serde(with = "u128_string")]
    pub credited_units: u128,
    pub address: String,
    pub from_address: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub block_timestamp: Option<DateTime<Utc>>,
    pub status: DepositStatus,
    pub confirmations: u32,
    pub required_confirmations: u32,
    pub fee: f64,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DepositRecord {
    pub fn is_credited(&self) -> bool {
        self.status == DepositStatus::Completed && self.credited_units > 0
    }
}

// u128 does not fit a JSON number, keep it as a decimal string on the wire
mod u128_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(v)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(D::Error::custom)
    }
}

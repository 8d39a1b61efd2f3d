//! Currency / Network Registry
//!
//! Read-only lookup of the networks a currency can be deposited on. Entries are
//! parsed from the `[[currencies]]` tables of the config file; the token
//! contract (if any) decides whether a network is swept and scanned as a
//! fungible token or as the chain's native coin.

use anyhow::{anyhow, Result};
use ethers::types::{Address, U256};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::chain::units::{decimal_to_f64, parse_decimal, LEDGER_DECIMALS};

/// How value moves on a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    /// Chain-native coin (18 decimals)
    Native,
    /// ERC-20 style token at the given contract
    Token(Address),
}

impl NetworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkKind::Native => "native",
            NetworkKind::Token(_) => "token",
        }
    }
}

/// Raw `[[currencies.networks]]` entry as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkEntry {
    pub id: String,
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub token_address: Option<String>,
    #[serde(default = "default_confirmations")]
    pub confirmations: u32,
    #[serde(default)]
    pub fee: f64,
    #[serde(default)]
    pub min_deposit: f64,
    #[serde(default = "default_active")]
    pub active: bool,
}

/// Raw `[[currencies]]` entry as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyEntry {
    pub id: String,
    #[serde(default)]
    pub symbol: Option<String>,
    /// USD value of one whole unit as an exact decimal; stablecoins keep the default of 1
    #[serde(default = "default_usd_price", deserialize_with = "decimal_text")]
    pub usd_price: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub networks: Vec<NetworkEntry>,
}

fn default_confirmations() -> u32 {
    12
}
fn default_active() -> bool {
    true
}
fn default_usd_price() -> String {
    "1".to_string()
}

/// Accept `usd_price = 0.5` as well as `usd_price = "0.5"`
fn decimal_text<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => f.to_string(),
        Raw::Text(s) => s.trim().to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub id: String,
    pub currency: String,
    pub rpc_url: Option<String>,
    pub kind: NetworkKind,
    pub confirmations: u32,
    pub fee: f64,
    pub min_deposit: f64,
    pub active: bool,
}

impl NetworkConfig {
    /// RPC endpoint, treating an empty string the same as a missing one
    pub fn rpc_url(&self) -> Option<&str> {
        self.rpc_url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct CurrencyConfig {
    pub id: String,
    pub symbol: String,
    /// Display only; credits use `price_units`
    pub usd_price: f64,
    /// Ledger units per whole token
    pub price_units: u128,
    pub active: bool,
    pub networks: Vec<NetworkConfig>,
}

impl CurrencyConfig {
    pub fn network(&self, network_id: &str) -> Option<&NetworkConfig> {
        let key = network_id.to_ascii_lowercase();
        self.networks.iter().find(|n| n.id == key)
    }
}

/// Registry of configured currencies keyed by lowercase id
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    currencies: BTreeMap<String, CurrencyConfig>,
}

impl NetworkRegistry {
    pub fn from_entries(entries: &[CurrencyEntry]) -> Result<Self> {
        let mut currencies = BTreeMap::new();

        for entry in entries {
            let id = entry.id.trim().to_ascii_lowercase();
            if id.is_empty() {
                return Err(anyhow!("currency id must not be empty"));
            }
            let price_units = parse_decimal(&entry.usd_price, LEDGER_DECIMALS)
                .ok()
                .filter(|p| !p.is_zero() && *p <= U256::from(u128::MAX))
                .ok_or_else(|| {
                    anyhow!(
                        "currency {}: usd_price must be a positive decimal with at most {} places, got {:?}",
                        id,
                        LEDGER_DECIMALS,
                        entry.usd_price
                    )
                })?
                .as_u128();

            let mut networks = Vec::with_capacity(entry.networks.len());
            for net in &entry.networks {
                let net_id = net.id.trim().to_ascii_lowercase();
                if net_id.is_empty() {
                    return Err(anyhow!("currency {}: network id must not be empty", id));
                }
                if networks.iter().any(|n: &NetworkConfig| n.id == net_id) {
                    return Err(anyhow!("currency {}: duplicate network {}", id, net_id));
                }

                let kind = match net.token_address.as_deref().map(str::trim) {
                    Some(raw) if !raw.is_empty() => {
                        let token: Address = raw.parse().map_err(|e| {
                            anyhow!("currency {} network {}: bad token_address: {}", id, net_id, e)
                        })?;
                        NetworkKind::Token(token)
                    }
                    _ => NetworkKind::Native,
                };

                if let Some(url) = net.rpc_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
                    url::Url::parse(url).map_err(|e| {
                        anyhow!("currency {} network {}: bad rpc_url: {}", id, net_id, e)
                    })?;
                }

                networks.push(NetworkConfig {
                    id: net_id,
                    currency: id.clone(),
                    rpc_url: net.rpc_url.clone(),
                    kind,
                    confirmations: net.confirmations,
                    fee: net.fee,
                    min_deposit: net.min_deposit,
                    active: net.active,
                });
            }

            let symbol = entry
                .symbol
                .clone()
                .unwrap_or_else(|| id.to_ascii_uppercase());

            if currencies
                .insert(
                    id.clone(),
                    CurrencyConfig {
                        id: id.clone(),
                        symbol,
                        usd_price: decimal_to_f64(&entry.usd_price),
                        price_units,
                        active: entry.active,
                        networks,
                    },
                )
                .is_some()
            {
                return Err(anyhow!("duplicate currency {}", id));
            }
        }

        Ok(Self { currencies })
    }

    pub fn currency(&self, currency_id: &str) -> Option<&CurrencyConfig> {
        self.currencies.get(&currency_id.to_ascii_lowercase())
    }

    /// Network config for a (currency, network) pair, if both are configured
    pub fn network(&self, currency_id: &str, network_id: &str) -> Option<&NetworkConfig> {
        self.currency(currency_id)?.network(network_id)
    }

    pub fn currencies(&self) -> impl Iterator<Item = &CurrencyConfig> {
        self.currencies.values()
    }

    pub fn is_empty(&self) -> bool {
        self.currencies.is_empty()
    }
}

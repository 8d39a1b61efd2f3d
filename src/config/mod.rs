//! Service configuration
//!
//! `custody.toml` is parsed into [`AppConfig`], environment overrides are
//! layered on top, and [`AppConfig::resolved`] turns the raw tables into typed
//! lookups (network registry, master wallets) used by the watcher and sweeper.

pub mod network;

use anyhow::{anyhow, Context, Result};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{env, fs, path::Path};

pub use network::{CurrencyConfig, CurrencyEntry, NetworkConfig, NetworkEntry, NetworkKind, NetworkRegistry};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCfg {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Required in the X-Admin-Token header of /api/admin routes
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Optional callback receiving a JSON body per credited deposit
    #[serde(default)]
    pub notify_url: Option<String>,
    /// Upper bound on ids accepted by one sweep / check call
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_port() -> u16 {
    7070
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_data_dir() -> String {
    "custody_data".to_string()
}
fn default_max_batch() -> usize {
    100
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            data_dir: default_data_dir(),
            admin_token: None,
            notify_url: None,
            max_batch: default_max_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherCfg {
    /// Blocks scanned back from the head when an address has no cursor yet
    #[serde(default = "default_lookback_blocks")]
    pub lookback_blocks: u64,
    /// Widest block range requested from the RPC in a single log query
    #[serde(default = "default_max_scan_blocks")]
    pub max_scan_blocks: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default)]
    pub poll_enabled: bool,
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_lookback_blocks() -> u64 {
    100
}
fn default_max_scan_blocks() -> u64 {
    2_000
}
fn default_rpc_timeout_ms() -> u64 {
    8_000
}
fn default_poll_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    5
}
fn default_max_backoff_secs() -> u64 {
    600
}

impl Default for WatcherCfg {
    fn default() -> Self {
        Self {
            lookback_blocks: default_lookback_blocks(),
            max_scan_blocks: default_max_scan_blocks(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            poll_enabled: false,
            poll_secs: default_poll_secs(),
            max_attempts: default_max_attempts(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperCfg {
    #[serde(default = "default_token_gas_limit")]
    pub token_gas_limit: u64,
    #[serde(default = "default_native_gas_limit")]
    pub native_gas_limit: u64,
}

fn default_token_gas_limit() -> u64 {
    65_000
}
fn default_native_gas_limit() -> u64 {
    21_000
}

impl Default for SweeperCfg {
    fn default() -> Self {
        Self {
            token_gas_limit: default_token_gas_limit(),
            native_gas_limit: default_native_gas_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterWalletEntry {
    pub network: String,
    pub address: String,
    #[serde(default = "default_wallet_active")]
    pub active: bool,
}

fn default_wallet_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerCfg,
    #[serde(default)]
    pub watcher: WatcherCfg,
    #[serde(default)]
    pub sweeper: SweeperCfg,
    #[serde(default)]
    pub currencies: Vec<CurrencyEntry>,
    #[serde(default)]
    pub master_wallets: Vec<MasterWalletEntry>,
}

impl AppConfig {
    /// Load from a TOML file; a missing file yields the defaults
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(raw)?;
        Ok(cfg)
    }

    /// Environment overrides, applied after the file is read
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("CUSTODY_PORT") {
            if let Ok(port) = val.trim().parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(val) = env::var("CUSTODY_BIND") {
            self.server.bind = val.trim().to_string();
        }
        if let Ok(val) = env::var("CUSTODY_DATA_DIR") {
            self.server.data_dir = val.trim().to_string();
        }
        if let Ok(val) = env::var("CUSTODY_ADMIN_TOKEN") {
            self.server.admin_token = Some(val.trim().to_string());
        }
        if let Ok(val) = env::var("CUSTODY_NOTIFY_URL") {
            self.server.notify_url = Some(val.trim().to_string());
        }
        if let Ok(val) = env::var("CUSTODY_POLL_ENABLED") {
            self.watcher.poll_enabled = val.trim() == "1" || val.trim().eq_ignore_ascii_case("true");
        }

        // CUSTODY_RPC_<NETWORK>_URL replaces the endpoint of that network for every currency
        for currency in &mut self.currencies {
            for net in &mut currency.networks {
                let key = format!(
                    "CUSTODY_RPC_{}_URL",
                    net.id.trim().to_ascii_uppercase().replace('-', "_")
                );
                if let Ok(url) = env::var(&key) {
                    net.rpc_url = Some(url.trim().to_string());
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.max_batch == 0 {
            return Err(anyhow!("server.max_batch must be at least 1"));
        }
        if self.watcher.lookback_blocks == 0 {
            return Err(anyhow!("watcher.lookback_blocks must be at least 1"));
        }
        if self.watcher.max_scan_blocks == 0 {
            return Err(anyhow!("watcher.max_scan_blocks must be at least 1"));
        }
        if self.watcher.poll_secs == 0 {
            return Err(anyhow!("watcher.poll_secs must be at least 1"));
        }
        if self.sweeper.token_gas_limit == 0 || self.sweeper.native_gas_limit == 0 {
            return Err(anyhow!("sweeper gas limits must be non-zero"));
        }
        if let Some(url) = self.server.notify_url.as_deref().filter(|u| !u.is_empty()) {
            url::Url::parse(url).map_err(|e| anyhow!("server.notify_url invalid: {}", e))?;
        }
        Ok(())
    }

    /// Validate and build the typed view used at runtime
    pub fn resolved(&self) -> Result<ResolvedConfig> {
        self.validate()?;
        let registry = NetworkRegistry::from_entries(&self.currencies)?;

        let mut master_wallets = HashMap::new();
        for entry in &self.master_wallets {
            let network = entry.network.trim().to_ascii_lowercase();
            let address: Address = entry
                .address
                .trim()
                .parse()
                .map_err(|e| anyhow!("master wallet for {}: bad address: {}", network, e))?;
            if master_wallets
                .insert(
                    network.clone(),
                    MasterWallet {
                        network: network.clone(),
                        address,
                        active: entry.active,
                    },
                )
                .is_some()
            {
                return Err(anyhow!("more than one master wallet for network {}", network));
            }
        }

        Ok(ResolvedConfig {
            server: self.server.clone(),
            watcher: self.watcher.clone(),
            sweeper: self.sweeper.clone(),
            registry,
            master_wallets,
        })
    }
}

/// Sweep destination for one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterWallet {
    pub network: String,
    pub address: Address,
    pub active: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub server: ServerCfg,
    pub watcher: WatcherCfg,
    pub sweeper: SweeperCfg,
    pub registry: NetworkRegistry,
    pub master_wallets: HashMap<String, MasterWallet>,
}

impl ResolvedConfig {
    /// Active master wallet for a network, if one is configured
    pub fn master_wallet(&self, network_id: &str) -> Option<&MasterWallet> {
        self.master_wallets
            .get(&network_id.to_ascii_lowercase())
            .filter(|w| w.active)
    }
}

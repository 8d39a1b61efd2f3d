#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use custody_node::chain::{
    fmt_address, generate_keypair, ChainClient, ChainConnector, ChainError, ChainResult,
    TransferLog,
};
use custody_node::config::{AppConfig, ResolvedConfig};
use custody_node::model::{CustodialAddress, SecretKey};
use custody_node::store::Store;
use ethers::types::{Address, H256, U256};
use parking_lot::Mutex;
use tempfile::TempDir;

pub const USDT_BSC: &str = "0x55d398326f99059ff775485246999027b3197955";
pub const USDT_POLYGON: &str = "0xc2132d05d31c914a87c6611c10748aeb04b58e8f";
pub const MASTER_BSC: &str = "0x00000000000000000000000000000000000000aa";
pub const MASTER_ETH: &str = "0x00000000000000000000000000000000000000bb";
pub const ADMIN_TOKEN: &str = "test-admin";

/// usdt on bsc and polygon (polygon has no master wallet), plus native eth.
/// Gas limits are 100k so gas price 1e10 wei costs exactly 0.001.
pub const TEST_CONFIG: &str = r#"
    [server]
    admin_token = "test-admin"
    max_batch = 3

    [watcher]
    lookback_blocks = 100
    max_scan_blocks = 1000

    [sweeper]
    token_gas_limit = 100000
    native_gas_limit = 100000

    [[currencies]]
    id = "usdt"

    [[currencies.networks]]
    id = "bsc"
    rpc_url = "http://mock-bsc"
    token_address = "0x55d398326f99059fF775485246999027B3197955"
    confirmations = 15
    fee = 0.5
    min_deposit = 1.0

    [[currencies.networks]]
    id = "polygon"
    rpc_url = "http://mock-polygon"
    token_address = "0xc2132D05D31c914a87C6611C10748AEb04B58e8F"

    [[currencies.networks]]
    id = "offline"
    token_address = "0x55d398326f99059fF775485246999027B3197955"

    [[currencies]]
    id = "eth"

    [[currencies.networks]]
    id = "ethereum"
    rpc_url = "http://mock-eth"

    [[master_wallets]]
    network = "bsc"
    address = "0x00000000000000000000000000000000000000aa"

    [[master_wallets]]
    network = "ethereum"
    address = "0x00000000000000000000000000000000000000bb"
"#;

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> Arc<ResolvedConfig> {
    Arc::new(
        AppConfig::from_toml(TEST_CONFIG)
            .expect("parse test config")
            .resolved()
            .expect("resolve test config"),
    )
}

/// Store on a throwaway directory; keep the TempDir alive for the test
pub fn temp_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(dir.path().join("db")).expect("open store");
    (dir, store)
}

pub fn issue(store: &Store, user: &str, currency: &str, network: &str) -> CustodialAddress {
    store
        .get_or_create_address(user, currency, network, || {
            let (address, secret) = generate_keypair();
            (fmt_address(&address), SecretKey::new(secret))
        })
        .expect("issue address")
        .0
}

pub fn addr(s: &str) -> Address {
    s.parse().expect("address")
}

pub fn transfer(to: &CustodialAddress, value: u64, block: u64, tag: u64) -> TransferLog {
    TransferLog {
        from: Address::repeat_byte(0x42),
        to: addr(&to.address),
        value: U256::from(value),
        block_number: block,
        block_timestamp: Some(1_700_000_000 + block),
        tx_hash: H256::from_low_u64_be(tag),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Native { to: Address, amount: U256 },
    Token { token: Address, to: Address, amount: U256 },
}

#[derive(Default)]
pub struct MockState {
    pub head: u64,
    pub logs: Vec<(Address, TransferLog)>,
    pub decimals: u8,
    pub native: HashMap<Address, U256>,
    pub tokens: HashMap<(Address, Address), U256>,
    pub gas_price: U256,
    pub fail_logs: bool,
    pub fail_decimals: bool,
    pub fail_balance: Vec<Address>,
    pub log_queries: Vec<(u64, u64)>,
    pub decimals_calls: usize,
    pub sent: Vec<Sent>,
}

/// In-memory chain shared by every RPC url
#[derive(Default)]
pub struct MockChain {
    pub state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(head: u64, decimals: u8) -> Arc<Self> {
        let chain = Self::default();
        {
            let mut s = chain.state.lock();
            s.head = head;
            s.decimals = decimals;
            s.gas_price = U256::from(10_000_000_000u64);
        }
        Arc::new(chain)
    }

    pub fn push_log(&self, token: &str, log: TransferLog) {
        self.state.lock().logs.push((addr(token), log));
    }

    pub fn set_native(&self, owner: &str, wei: U256) {
        self.state.lock().native.insert(addr(owner), wei);
    }

    pub fn set_token(&self, token: &str, owner: &str, raw: U256) {
        self.state.lock().tokens.insert((addr(token), addr(owner)), raw);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.state.lock().sent.clone()
    }

    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.state.lock().log_queries.clone()
    }
}

#[async_trait::async_trait]
impl ChainClient for MockChain {
    async fn block_number(&self) -> ChainResult<u64> {
        Ok(self.state.lock().head)
    }

    async fn native_balance(&self, owner: Address) -> ChainResult<U256> {
        let s = self.state.lock();
        if s.fail_balance.contains(&owner) {
            return Err(ChainError::Rpc("connection reset".into()));
        }
        Ok(s.native.get(&owner).copied().unwrap_or_default())
    }

    async fn token_balance(&self, token: Address, owner: Address) -> ChainResult<U256> {
        let s = self.state.lock();
        if s.fail_balance.contains(&owner) {
            return Err(ChainError::Rpc("connection reset".into()));
        }
        Ok(s.tokens.get(&(token, owner)).copied().unwrap_or_default())
    }

    async fn token_decimals(&self, _token: Address) -> ChainResult<u8> {
        let mut s = self.state.lock();
        s.decimals_calls += 1;
        if s.fail_decimals {
            return Err(ChainError::Rpc("decimals() reverted".into()));
        }
        Ok(s.decimals)
    }

    async fn gas_price(&self) -> ChainResult<U256> {
        Ok(self.state.lock().gas_price)
    }

    async fn transfer_logs(
        &self,
        token: Address,
        recipient: Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<TransferLog>> {
        // let concurrent checks interleave here
        tokio::task::yield_now().await;
        let mut s = self.state.lock();
        if s.fail_logs {
            return Err(ChainError::Timeout(8_000));
        }
        s.log_queries.push((from_block, to_block));
        Ok(s.logs
            .iter()
            .filter(|(t, l)| {
                *t == token
                    && l.to == recipient
                    && l.block_number >= from_block
                    && l.block_number <= to_block
            })
            .map(|(_, l)| l.clone())
            .collect())
    }

    async fn send_native(
        &self,
        _private_key: &str,
        to: Address,
        amount: U256,
        _gas_limit: u64,
        _gas_price: U256,
    ) -> ChainResult<H256> {
        let mut s = self.state.lock();
        s.sent.push(Sent::Native { to, amount });
        Ok(H256::from_low_u64_be(0xfeed + s.sent.len() as u64))
    }

    async fn send_token(
        &self,
        _private_key: &str,
        token: Address,
        to: Address,
        amount: U256,
        _gas_limit: u64,
        _gas_price: U256,
    ) -> ChainResult<H256> {
        let mut s = self.state.lock();
        s.sent.push(Sent::Token { token, to, amount });
        Ok(H256::from_low_u64_be(0xbeef + s.sent.len() as u64))
    }
}

pub struct MockConnector {
    pub chain: Arc<MockChain>,
    pub connected: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new(chain: Arc<MockChain>) -> Arc<Self> {
        Arc::new(Self {
            chain,
            connected: Mutex::new(Vec::new()),
        })
    }
}

impl ChainConnector for MockConnector {
    fn connect(&self, rpc_url: &str) -> ChainResult<Arc<dyn ChainClient>> {
        self.connected.lock().push(rpc_url.to_string());
        Ok(self.chain.clone() as Arc<dyn ChainClient>)
    }
}

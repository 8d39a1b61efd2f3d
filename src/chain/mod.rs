//! On-chain access for EVM networks.
//!
//! The watcher and sweeper only talk to the chain through [`ChainClient`], one
//! instance per RPC endpoint, handed out by a [`ChainConnector`]. The
//! production connector is [`evm::EvmConnector`] (ethers over HTTP).

pub mod evm;
pub mod units;

use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use thiserror::Error;

pub use evm::{generate_keypair, EvmConnector};

/// Decimal places of every EVM chain-native coin
pub const NATIVE_DECIMALS: u32 = 18;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("rpc call timed out after {0} ms")]
    Timeout(u64),
    #[error("contract call failed: {0}")]
    Contract(String),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("invalid rpc url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("malformed log: {0}")]
    MalformedLog(String),
}

pub type ChainResult<T> = Result<T, ChainError>;

/// One ERC-20 `Transfer` event addressed to a watched address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLog {
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub block_number: u64,
    pub block_timestamp: Option<u64>,
    pub tx_hash: H256,
}

#[async_trait::async_trait]
pub trait ChainClient: Send + Sync {
    /// Current head block number
    async fn block_number(&self) -> ChainResult<u64>;

    /// Native coin balance in wei
    async fn native_balance(&self, owner: Address) -> ChainResult<U256>;

    /// `balanceOf(owner)` on a token contract, in the token's smallest unit
    async fn token_balance(&self, token: Address, owner: Address) -> ChainResult<U256>;

    /// `decimals()` on a token contract
    async fn token_decimals(&self, token: Address) -> ChainResult<u8>;

    /// Current gas price in wei
    async fn gas_price(&self) -> ChainResult<U256>;

    /// Transfer events of `token` sent to `recipient` within `[from_block, to_block]`
    async fn transfer_logs(
        &self,
        token: Address,
        recipient: Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<TransferLog>>;

    /// Sign and broadcast a native transfer; returns once the node accepted it
    async fn send_native(
        &self,
        private_key: &str,
        to: Address,
        amount: U256,
        gas_limit: u64,
        gas_price: U256,
    ) -> ChainResult<H256>;

    /// Sign and broadcast `transfer(to, amount)` on a token contract
    #[allow(clippy::too_many_arguments)]
    async fn send_token(
        &self,
        private_key: &str,
        token: Address,
        to: Address,
        amount: U256,
        gas_limit: u64,
        gas_price: U256,
    ) -> ChainResult<H256>;
}

/// Builds a [`ChainClient`] for an RPC endpoint
pub trait ChainConnector: Send + Sync {
    fn connect(&self, rpc_url: &str) -> ChainResult<Arc<dyn ChainClient>>;
}

/// Lowercase 0x-prefixed hex, the form addresses are stored and compared in
pub fn fmt_address(address: &Address) -> String {
    format!("{:#x}", address)
}

pub fn fmt_hash(hash: &H256) -> String {
    format!("{:#x}", hash)
}

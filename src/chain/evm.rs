//! ethers-backed [`ChainClient`] over JSON-RPC/HTTP.

use ethers::prelude::*;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{ChainClient, ChainConnector, ChainError, ChainResult, TransferLog};

abigen!(
    Erc20Token,
    r#"[
        function balanceOf(address owner) external view returns (uint256)
        function decimals() external view returns (uint8)
        function transfer(address to, uint256 amount) external returns (bool)
    ]"#
);

const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";

/// Connector handing out one ethers HTTP provider per RPC URL
#[derive(Debug, Clone)]
pub struct EvmConnector {
    timeout: Duration,
}

impl EvmConnector {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

impl ChainConnector for EvmConnector {
    fn connect(&self, rpc_url: &str) -> ChainResult<Arc<dyn ChainClient>> {
        let provider =
            Provider::<Http>::try_from(rpc_url).map_err(|e| ChainError::InvalidUrl {
                url: rpc_url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Arc::new(EvmClient {
            provider,
            timeout: self.timeout,
        }))
    }
}

pub struct EvmClient {
    provider: Provider<Http>,
    timeout: Duration,
}

impl EvmClient {
    /// Bound a single RPC round-trip by the configured timeout
    async fn timed<T, E, F>(&self, fut: F) -> ChainResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(ChainError::Rpc(e.to_string())),
            Err(_) => Err(ChainError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    async fn signer(
        &self,
        private_key: &str,
    ) -> ChainResult<SignerMiddleware<Provider<Http>, LocalWallet>> {
        let wallet: LocalWallet = private_key
            .trim()
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| ChainError::InvalidKey(format!("{}", e)))?;
        let chain_id = self.timed(self.provider.get_chainid()).await?;
        Ok(SignerMiddleware::new(
            self.provider.clone(),
            wallet.with_chain_id(chain_id.as_u64()),
        ))
    }

    fn token(&self, token: Address) -> Erc20Token<Provider<Http>> {
        Erc20Token::new(token, Arc::new(self.provider.clone()))
    }
}

#[async_trait::async_trait]
impl ChainClient for EvmClient {
    async fn block_number(&self) -> ChainResult<u64> {
        let n = self.timed(self.provider.get_block_number()).await?;
        Ok(n.as_u64())
    }

    async fn native_balance(&self, owner: Address) -> ChainResult<U256> {
        self.timed(self.provider.get_balance(owner, None)).await
    }

    async fn token_balance(&self, token: Address, owner: Address) -> ChainResult<U256> {
        let contract = self.token(token);
        let call = contract.balance_of(owner);
        self.timed(call.call())
            .await
            .map_err(|e| ChainError::Contract(format!("balanceOf: {}", e)))
    }

    async fn token_decimals(&self, token: Address) -> ChainResult<u8> {
        let contract = self.token(token);
        let call = contract.decimals();
        self.timed(call.call())
            .await
            .map_err(|e| ChainError::Contract(format!("decimals: {}", e)))
    }

    async fn gas_price(&self) -> ChainResult<U256> {
        self.timed(self.provider.get_gas_price()).await
    }

    async fn transfer_logs(
        &self,
        token: Address,
        recipient: Address,
        from_block: u64,
        to_block: u64,
    ) -> ChainResult<Vec<TransferLog>> {
        // indexed address topics are left-padded to 32 bytes
        let mut padded = [0u8; 32];
        padded[12..].copy_from_slice(recipient.as_bytes());

        let filter = Filter::new()
            .address(token)
            .event(TRANSFER_EVENT)
            .topic2(H256::from(padded))
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.timed(self.provider.get_logs(&filter)).await?;

        let mut timestamps: HashMap<u64, Option<u64>> = HashMap::new();
        let mut out = Vec::with_capacity(logs.len());

        for log in &logs {
            let Some(mut transfer) = decode_transfer(log)? else {
                continue;
            };
            transfer.block_timestamp = match timestamps.get(&transfer.block_number) {
                Some(ts) => *ts,
                None => {
                    let ts = self
                        .timed(self.provider.get_block(transfer.block_number))
                        .await?
                        .map(|b| b.timestamp.as_u64());
                    timestamps.insert(transfer.block_number, ts);
                    ts
                }
            };
            out.push(transfer);
        }

        Ok(out)
    }

    async fn send_native(
        &self,
        private_key: &str,
        to: Address,
        amount: U256,
        gas_limit: u64,
        gas_price: U256,
    ) -> ChainResult<H256> {
        let client = self.signer(private_key).await?;
        let tx = TransactionRequest::new()
            .to(to)
            .value(amount)
            .gas(gas_limit)
            .gas_price(gas_price);

        let pending = self.timed(client.send_transaction(tx, None)).await?;
        Ok(pending.tx_hash())
    }

    async fn send_token(
        &self,
        private_key: &str,
        token: Address,
        to: Address,
        amount: U256,
        gas_limit: u64,
        gas_price: U256,
    ) -> ChainResult<H256> {
        let client = Arc::new(self.signer(private_key).await?);
        let contract = Erc20Token::new(token, client);
        let call = contract
            .transfer(to, amount)
            .legacy()
            .gas(gas_limit)
            .gas_price(gas_price);

        let pending = self
            .timed(call.send())
            .await
            .map_err(|e| ChainError::Contract(format!("transfer: {}", e)))?;
        Ok(pending.tx_hash())
    }
}

/// Map a raw `Transfer` log to a [`TransferLog`] without its block timestamp.
/// Logs removed by a reorg yield `None`.
pub(crate) fn decode_transfer(log: &Log) -> ChainResult<Option<TransferLog>> {
    if log.removed == Some(true) {
        return Ok(None);
    }
    if log.topics.len() < 3 {
        return Err(ChainError::MalformedLog(format!(
            "expected 3 topics, got {}",
            log.topics.len()
        )));
    }
    let tx_hash = log
        .transaction_hash
        .ok_or_else(|| ChainError::MalformedLog("log without transaction hash".into()))?;
    let block_number = log
        .block_number
        .ok_or_else(|| ChainError::MalformedLog("log without block number".into()))?
        .as_u64();

    let from = Address::from_slice(&log.topics[1].as_bytes()[12..]);
    let to = Address::from_slice(&log.topics[2].as_bytes()[12..]);
    let value = if log.data.len() >= 32 {
        U256::from_big_endian(&log.data[..32])
    } else {
        U256::from_big_endian(&log.data)
    };

    Ok(Some(TransferLog {
        from,
        to,
        value,
        block_number,
        block_timestamp: None,
        tx_hash,
    }))
}

/// Fresh secp256k1 key pair for a custodial address: (0x address, hex private key)
pub fn generate_keypair() -> (Address, String) {
    let wallet = LocalWallet::new(&mut rand::thread_rng());
    let secret = hex::encode(wallet.signer().to_bytes());
    (wallet.address(), secret)
}

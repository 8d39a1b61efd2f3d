// Custody Store: sled-backed persistence for custodial addresses, deposits and balances
//
// Trees:
//   "custodial_addresses"  id -> CustodialAddress (JSON)
//   "custodial_index"      "{user}\0{currency}\0{network}" -> id
//   "deposits"             tx hash (lowercase 0x hex) -> DepositRecord (JSON)
//   "user_deposits"        "{user}\0{created_ms:020}\0{tx hash}" -> tx hash
//   "balances"             user id -> u128 big-endian ledger units
//   "scan_cursors"         address id -> u64 big-endian last scanned block

mod addresses;
mod cursors;
mod deposits;

use anyhow::{anyhow, Result};
use sled::transaction::TransactionError;
use sled::{Db, Tree};
use std::fmt;
use std::path::Path;

pub use deposits::RecordOutcome;

const ADDRESSES_TREE: &str = "custodial_addresses";
const ADDRESS_INDEX_TREE: &str = "custodial_index";
const DEPOSITS_TREE: &str = "deposits";
const USER_DEPOSITS_TREE: &str = "user_deposits";
const BALANCES_TREE: &str = "balances";
const CURSORS_TREE: &str = "scan_cursors";

#[derive(Clone)]
pub struct Store {
    db: Db,
    addresses: Tree,
    address_index: Tree,
    deposits: Tree,
    user_deposits: Tree,
    balances: Tree,
    cursors: Tree,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory store that disappears on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    pub fn from_db(db: Db) -> Result<Self> {
        Ok(Self {
            addresses: db.open_tree(ADDRESSES_TREE)?,
            address_index: db.open_tree(ADDRESS_INDEX_TREE)?,
            deposits: db.open_tree(DEPOSITS_TREE)?,
            user_deposits: db.open_tree(USER_DEPOSITS_TREE)?,
            balances: db.open_tree(BALANCES_TREE)?,
            cursors: db.open_tree(CURSORS_TREE)?,
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_u128_be(bytes: &[u8]) -> Result<u128> {
    let arr: [u8; 16] = bytes
        .try_into()
        .map_err(|_| anyhow!("invalid balance bytes (len {})", bytes.len()))?;
    Ok(u128::from_be_bytes(arr))
}

fn decode_u64_be(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| anyhow!("invalid cursor bytes (len {})", bytes.len()))?;
    Ok(u64::from_be_bytes(arr))
}

fn tx_error<E: fmt::Display>(e: TransactionError<E>) -> anyhow::Error {
    match e {
        TransactionError::Abort(reason) => anyhow!("transaction aborted: {}", reason),
        TransactionError::Storage(err) => anyhow!("storage: {}", err),
    }
}

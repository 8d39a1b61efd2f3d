use anyhow::Result;
use sled::transaction::{abort, ConflictableTransactionResult, TransactionResult};
use sled::Transactional;

use super::{decode_u128_be, tx_error, Store};
use crate::model::DepositRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Record stored and (when credited) balance increased
    Inserted,
    /// A record for this tx hash already exists; nothing changed
    AlreadyExists,
}

fn user_key(record: &DepositRecord) -> Vec<u8> {
    format!(
        "{}\0{:020}\0{}",
        record.user_id,
        record.created_at.timestamp_millis().max(0),
        record.tx_hash
    )
    .into_bytes()
}

impl Store {
    pub fn deposit_exists(&self, tx_hash: &str) -> Result<bool> {
        Ok(self.deposits.contains_key(tx_hash.to_lowercase().as_bytes())?)
    }

    pub fn get_deposit(&self, tx_hash: &str) -> Result<Option<DepositRecord>> {
        match self.deposits.get(tx_hash.to_lowercase().as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Insert a deposit and apply its credit atomically.
    ///
    /// The existence check, the record insert, the per-user index entry and
    /// the balance increment share one transaction, so a tx hash is credited
    /// at most once no matter how many scans race on it.
    pub fn record_deposit(&self, record: &DepositRecord) -> Result<RecordOutcome> {
        let key = record.tx_hash.to_lowercase();
        let bytes = serde_json::to_vec(record)?;
        let index_key = user_key(record);
        let credit = if record.is_credited() {
            record.credited_units
        } else {
            0
        };

        let result: TransactionResult<RecordOutcome, String> =
            (&self.deposits, &self.user_deposits, &self.balances).transaction(
                |(deposits, user_deposits, balances)| -> ConflictableTransactionResult<RecordOutcome, String> {
                    if deposits.get(key.as_bytes())?.is_some() {
                        return Ok(RecordOutcome::AlreadyExists);
                    }
                    deposits.insert(key.as_bytes(), bytes.clone())?;
                    user_deposits.insert(index_key.clone(), key.as_bytes())?;

                    if credit > 0 {
                        let current = match balances.get(record.user_id.as_bytes())? {
                            Some(raw) => match decode_u128_be(&raw) {
                                Ok(v) => v,
                                Err(e) => return abort(e.to_string()),
                            },
                            None => 0,
                        };
                        let Some(next) = current.checked_add(credit) else {
                            return abort(format!("balance overflow for user {}", record.user_id));
                        };
                        balances.insert(record.user_id.as_bytes(), &next.to_be_bytes()[..])?;
                    }
                    Ok(RecordOutcome::Inserted)
                },
            );

        result.map_err(tx_error)
    }

    /// Deposits of one user, oldest first
    pub fn deposits_for_user(&self, user_id: &str) -> Result<Vec<DepositRecord>> {
        let prefix = format!("{}\0", user_id);
        let mut out = Vec::new();
        for item in self.user_deposits.scan_prefix(prefix.as_bytes()) {
            let (_, hash) = item?;
            if let Some(raw) = self.deposits.get(&hash)? {
                out.push(serde_json::from_slice(&raw)?);
            }
        }
        Ok(out)
    }

    /// Ledger balance of a user in ledger units (0 when never credited)
    pub fn balance(&self, user_id: &str) -> Result<u128> {
        match self.balances.get(user_id.as_bytes())? {
            Some(raw) => decode_u128_be(&raw),
            None => Ok(0),
        }
    }
}

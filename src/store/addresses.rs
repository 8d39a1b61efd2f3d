use anyhow::{anyhow, Result};
use chrono::Utc;
use sled::transaction::{ConflictableTransactionResult, TransactionResult};
use sled::Transactional;

use super::{tx_error, Store};
use crate::model::{CustodialAddress, SecretKey};

fn index_key(user_id: &str, currency: &str, network: &str) -> Vec<u8> {
    format!("{}\0{}\0{}", user_id, currency, network).into_bytes()
}

impl Store {
    /// Return the custodial address for the triple, generating one on first request.
    ///
    /// The index entry and the record are written in one transaction so
    /// concurrent first requests converge on a single address. The bool is
    /// true when this call created the record.
    pub fn get_or_create_address<F>(
        &self,
        user_id: &str,
        currency: &str,
        network: &str,
        generate: F,
    ) -> Result<(CustodialAddress, bool)>
    where
        F: FnOnce() -> (String, SecretKey),
    {
        if let Some(existing) = self.find_address(user_id, currency, network)? {
            return Ok((existing, false));
        }

        let (address, private_key) = generate();
        let record = CustodialAddress {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            currency: currency.to_string(),
            network: network.to_string(),
            address,
            private_key,
            active: true,
            last_balance: None,
            last_used_at: None,
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&record)?;
        let key = index_key(user_id, currency, network);

        let result: TransactionResult<Option<sled::IVec>, String> = (&self.address_index, &self.addresses)
            .transaction(|(index, addresses)| -> ConflictableTransactionResult<Option<sled::IVec>, String> {
                if let Some(existing_id) = index.get(&key)? {
                    return Ok(addresses.get(existing_id)?);
                }
                index.insert(key.clone(), record.id.as_bytes())?;
                addresses.insert(record.id.as_bytes(), bytes.clone())?;
                Ok(None)
            });

        match result.map_err(tx_error)? {
            None => {
                tracing::info!(
                    address_id = %record.id,
                    user_id,
                    currency,
                    network,
                    address = %record.address,
                    "issued custodial address"
                );
                Ok((record, true))
            }
            Some(raw) => {
                let existing: CustodialAddress = serde_json::from_slice(&raw)?;
                Ok((existing, false))
            }
        }
    }

    pub fn get_address(&self, id: &str) -> Result<Option<CustodialAddress>> {
        match self.addresses.get(id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn find_address(
        &self,
        user_id: &str,
        currency: &str,
        network: &str,
    ) -> Result<Option<CustodialAddress>> {
        match self.address_index.get(index_key(user_id, currency, network))? {
            Some(id) => {
                let id = String::from_utf8(id.to_vec())?;
                self.get_address(&id)
            }
            None => Ok(None),
        }
    }

    pub fn list_addresses(&self) -> Result<Vec<CustodialAddress>> {
        let mut out = Vec::new();
        for item in self.addresses.iter() {
            let (_, raw) = item?;
            out.push(serde_json::from_slice(&raw)?);
        }
        Ok(out)
    }

    pub fn addresses_for_user(&self, user_id: &str) -> Result<Vec<CustodialAddress>> {
        let prefix = format!("{}\0", user_id);
        let mut out = Vec::new();
        for item in self.address_index.scan_prefix(prefix.as_bytes()) {
            let (_, id) = item?;
            let id = String::from_utf8(id.to_vec())?;
            if let Some(addr) = self.get_address(&id)? {
                out.push(addr);
            }
        }
        Ok(out)
    }

    /// Refresh last-used time and, when given, the last observed balance
    pub fn touch_address(&self, id: &str, last_balance: Option<String>) -> Result<()> {
        let mut record = self
            .get_address(id)?
            .ok_or_else(|| anyhow!("custodial address {} not found", id))?;
        record.last_used_at = Some(Utc::now());
        if last_balance.is_some() {
            record.last_balance = last_balance;
        }
        self.addresses
            .insert(id.as_bytes(), serde_json::to_vec(&record)?)?;
        Ok(())
    }
}

use anyhow::Result;

use super::{decode_u64_be, Store};

impl Store {
    /// Last block fully scanned for this address, if any
    pub fn scan_cursor(&self, address_id: &str) -> Result<Option<u64>> {
        match self.cursors.get(address_id.as_bytes())? {
            Some(raw) => Ok(Some(decode_u64_be(&raw)?)),
            None => Ok(None),
        }
    }

    /// Move the cursor forward to `block`. Never moves it backwards.
    pub fn advance_scan_cursor(&self, address_id: &str, block: u64) -> Result<()> {
        self.cursors.update_and_fetch(address_id.as_bytes(), |old| {
            let current = old
                .and_then(|b| <[u8; 8]>::try_from(b).ok())
                .map(u64::from_be_bytes);
            let next = match current {
                Some(c) if c >= block => c,
                _ => block,
            };
            Some(next.to_be_bytes().to_vec())
        })?;
        Ok(())
    }
}

//! Smallest-unit <-> decimal conversions.
//!
//! Ledger balances are kept in fixed-point "ledger units": 10^18 units per USD,
//! stored as `u128` so no float rounding ever reaches a balance.

use anyhow::{anyhow, Result};
use ethers::types::U256;
use ethers::utils::{format_units, parse_units};

/// Decimal places of a ledger unit
pub const LEDGER_DECIMALS: u32 = 18;

/// Raw integer amount -> decimal string, trailing zeros trimmed
pub fn format_amount(raw: U256, decimals: u32) -> Result<String> {
    let s = format_units(raw, decimals)
        .map_err(|e| anyhow!("cannot format with {} decimals: {}", decimals, e))?;
    Ok(trim_decimal(&s))
}

/// "12.345600" -> "12.3456", "1.000" -> "1"
pub fn trim_decimal(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Decimal number (as configured) -> raw integer with `decimals` places
pub fn parse_amount(value: f64, decimals: u32) -> Result<U256> {
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("amount must be a finite non-negative number, got {}", value));
    }
    let parsed = parse_units(value.to_string(), decimals)
        .map_err(|e| anyhow!("cannot parse {} with {} decimals: {}", value, decimals, e))?;
    Ok(parsed.into())
}

/// Exact decimal text -> raw integer with `decimals` places. More fractional
/// digits than `decimals` is an error, never rounded.
pub fn parse_decimal(value: &str, decimals: u32) -> Result<U256> {
    let v = value.trim();
    let (whole, frac) = v.split_once('.').unwrap_or((v, ""));
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !digits(whole) || !digits(frac) {
        return Err(anyhow!("not a non-negative decimal: {:?}", value));
    }
    if frac.len() > decimals as usize {
        return Err(anyhow!("{} has more than {} decimal places", v, decimals));
    }
    let padded = format!(
        "{}{}{}",
        if whole.is_empty() { "0" } else { whole },
        frac,
        "0".repeat(decimals as usize - frac.len())
    );
    U256::from_dec_str(&padded).map_err(|e| anyhow!("{} out of range: {}", v, e))
}

/// Ledger credit for a raw token amount at `price_units` ledger units per whole token
pub fn to_ledger_units(raw: U256, decimals: u32, price_units: u128) -> Result<u128> {
    let scale = U256::exp10(decimals as usize);
    let credit = raw
        .checked_mul(U256::from(price_units))
        .ok_or_else(|| anyhow!("ledger credit overflow for raw amount {}", raw))?
        / scale;
    if credit > U256::from(u128::MAX) {
        return Err(anyhow!("ledger credit {} exceeds u128", credit));
    }
    Ok(credit.as_u128())
}

/// Ledger units -> decimal USD string
pub fn ledger_to_string(units: u128) -> String {
    format_amount(U256::from(units), LEDGER_DECIMALS).unwrap_or_else(|_| units.to_string())
}

/// True when `raw` is strictly below the configured minimum (0 disables the check)
pub fn below_minimum(raw: U256, decimals: u32, minimum: f64) -> Result<bool> {
    if minimum <= 0.0 {
        return Ok(false);
    }
    Ok(raw < parse_amount(minimum, decimals)?)
}

pub fn decimal_to_f64(s: &str) -> f64 {
    s.parse::<f64>().unwrap_or(0.0)
}

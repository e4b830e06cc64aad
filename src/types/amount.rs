//! Tip amounts in micro-units (6 fractional digits)

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{Result, TipRelayError};

/// Number of fractional digits carried by an amount
pub const AMOUNT_DECIMALS: u32 = 6;

/// Micro-units per whole token
pub const MICROS_PER_UNIT: u64 = 1_000_000;

/// A strictly positive token amount stored as micro-units.
///
/// Parsing rounds half-up to six fractional digits. Zero, negative,
/// non-numeric and overflowing inputs are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    /// Build from micro-units; zero is rejected.
    pub fn from_micros(micros: u64) -> Result<Self> {
        if micros == 0 {
            return Err(TipRelayError::Validation("amount must be positive".into()));
        }
        Ok(Self(micros))
    }

    /// Parse a decimal string such as `5`, `0.25` or `.5`.
    pub fn parse(input: &str) -> Result<Self> {
        let text = input.trim();
        let invalid = || TipRelayError::Validation(format!("invalid amount: {:?}", input));

        let (whole, frac) = match text.split_once('.') {
            Some((w, f)) => (w, f),
            None => (text, ""),
        };

        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let whole_units: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };

        let mut frac_micros: u64 = 0;
        let mut round_up = false;
        for (i, digit) in frac.bytes().enumerate() {
            let d = u64::from(digit - b'0');
            if i < AMOUNT_DECIMALS as usize {
                frac_micros = frac_micros * 10 + d;
            } else {
                round_up = i == AMOUNT_DECIMALS as usize && d >= 5;
                break;
            }
        }
        let shown = frac.len().min(AMOUNT_DECIMALS as usize) as u32;
        frac_micros *= 10u64.pow(AMOUNT_DECIMALS - shown);

        let micros = whole_units
            .checked_mul(MICROS_PER_UNIT)
            .and_then(|m| m.checked_add(frac_micros))
            .and_then(|m| m.checked_add(u64::from(round_up)))
            .ok_or_else(|| TipRelayError::Validation(format!("amount too large: {}", input)))?;

        Self::from_micros(micros)
    }

    pub fn micros(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:06}",
            self.0 / MICROS_PER_UNIT,
            self.0 % MICROS_PER_UNIT
        )
    }
}

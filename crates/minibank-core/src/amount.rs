//! Fixed two-decimal amount rendering and parsing.
//!
//! Amounts cross the service boundary as plain strings with exactly two
//! fractional digits and no grouping separators, independent of any locale.

use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("invalid amount: {0}")]
    Malformed(String),
    #[error("amount must be positive")]
    NotPositive,
    #[error("amount has more than two fractional digits: {0}")]
    TooPrecise(String),
}

/// Renders `amount` with exactly two fractional digits, rounding half to even.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    format!("{:.2}", rounded)
}

/// Parses a transfer amount: a positive decimal with at most two fractional digits.
pub fn parse_amount(input: &str) -> Result<Decimal, AmountError> {
    let trimmed = input.trim();
    let amount =
        Decimal::from_str(trimmed).map_err(|_| AmountError::Malformed(trimmed.to_string()))?;
    if amount <= Decimal::ZERO {
        return Err(AmountError::NotPositive);
    }
    if amount.normalize().scale() > 2 {
        return Err(AmountError::TooPrecise(trimmed.to_string()));
    }
    Ok(amount)
}

//   Copyright 2024 The Bywise Community
//   SPDX-License-Identifier: BSD-3-Clause

use std::str::FromStr;

use bigdecimal::{BigDecimal, Zero};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AmountError {
    #[error("invalid decimal amount: {0}")]
    Invalid(String),
    #[error("negative amount: {0}")]
    Negative(String),
}

/// Parses a wire amount. Amounts are decimal strings and never negative.
pub fn parse_amount(s: &str) -> Result<BigDecimal, AmountError> {
    let value = BigDecimal::from_str(s).map_err(|_| AmountError::Invalid(s.to_string()))?;
    if value < BigDecimal::zero() {
        return Err(AmountError::Negative(s.to_string()));
    }
    Ok(value)
}

/// Renders an amount back to its canonical wire form (no trailing zeros).
pub fn format_amount(value: &BigDecimal) -> String {
    value.normalized().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes() {
        let v = parse_amount("100.50").unwrap();
        assert_eq!(format_amount(&v), "100.5");
        assert_eq!(format_amount(&parse_amount("0").unwrap()), "0");
    }

    #[test]
    fn rejects_garbage_and_negatives() {
        assert!(matches!(parse_amount("12x"), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_amount("-1"), Err(AmountError::Negative(_))));
    }
}

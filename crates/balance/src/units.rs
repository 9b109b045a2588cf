//! Exact conversion between raw on-chain integers and decimal strings.
//!
//! Balances can exceed the range where `f64` is exact, so everything here is
//! integer arithmetic on `U256`.

use alloy_primitives::U256;
use thiserror::Error;

/// Fractional digits kept when formatting for display.
pub const DISPLAY_DECIMALS: usize = 6;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitsError {
    #[error("amount is empty")]
    Empty,

    #[error("amount must not be negative: {0}")]
    Negative(String),

    #[error("not a decimal number: {0}")]
    Invalid(String),

    #[error("{0} has more fractional digits than the token supports ({1})")]
    TooPrecise(String, u8),

    #[error("amount out of range: {0}")]
    Overflow(String),
}

fn pow10(decimals: u8) -> Option<U256> {
    U256::from(10u8).checked_pow(U256::from(decimals))
}

/// Format `raw` with `decimals` for display.
///
/// Truncates (never rounds) to six fractional digits, strips trailing zeros
/// and drops an all-zero fraction: `1234500000000000000` with 18 decimals is
/// `"1.2345"`, `10^18` is `"1"`.
pub fn format_units(raw: U256, decimals: u8) -> String {
    let Some(base) = pow10(decimals) else {
        return raw.to_string();
    };
    let whole = raw / base;
    if decimals == 0 {
        return whole.to_string();
    }

    let fraction = (raw % base).to_string();
    let padded = format!("{:0>width$}", fraction, width = decimals as usize);
    let keep = DISPLAY_DECIMALS.min(decimals as usize);
    let truncated = padded[..keep].trim_end_matches('0');

    if truncated.is_empty() {
        whole.to_string()
    } else {
        format!("{whole}.{truncated}")
    }
}

/// Parse a decimal string such as `"250.5"` into raw units.
pub fn parse_units(text: &str, decimals: u8) -> Result<U256, UnitsError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(UnitsError::Empty);
    }
    if text.starts_with('-') {
        return Err(UnitsError::Negative(text.to_string()));
    }

    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !digits_only(whole) || !digits_only(fraction)
    {
        return Err(UnitsError::Invalid(text.to_string()));
    }
    if fraction.len() > decimals as usize {
        return Err(UnitsError::TooPrecise(text.to_string(), decimals));
    }

    let overflow = || UnitsError::Overflow(text.to_string());
    let base = pow10(decimals).ok_or_else(overflow)?;

    let whole = if whole.is_empty() {
        U256::ZERO
    } else {
        whole.parse::<U256>().map_err(|_| overflow())?
    };
    let fraction = if fraction.is_empty() {
        U256::ZERO
    } else {
        let padded = format!("{:0<width$}", fraction, width = decimals as usize);
        padded.parse::<U256>().map_err(|_| overflow())?
    };

    whole
        .checked_mul(base)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(s: &str) -> U256 {
        s.parse().unwrap()
    }

    #[test]
    fn test_format_strips_trailing_zeros() {
        assert_eq!(format_units(raw("1234500000000000000"), 18), "1.2345");
        assert_eq!(format_units(raw("1000000000000000000"), 18), "1");
        assert_eq!(format_units(U256::ZERO, 18), "0");
    }

    #[test]
    fn test_format_truncates_not_rounds() {
        // 0.9999999 -> 0.999999
        assert_eq!(format_units(raw("999999900000000000"), 18), "0.999999");
        // Below display precision entirely
        assert_eq!(format_units(raw("400000000000"), 18), "0");
        assert_eq!(format_units(raw("250000000000000000000"), 18), "250");
    }

    #[test]
    fn test_format_small_decimals() {
        assert_eq!(format_units(raw("1050"), 2), "10.5");
        assert_eq!(format_units(raw("7"), 0), "7");
        assert_eq!(format_units(raw("1234567"), 6), "1.234567");
    }

    #[test]
    fn test_format_beyond_u128() {
        let big = raw("123456789012345678901234567890123456789012345");
        assert_eq!(
            format_units(big, 18),
            "123456789012345678901234567.890123"
        );
    }

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_units("300", 18).unwrap(), raw("300000000000000000000"));
        assert_eq!(parse_units("250.5", 18).unwrap(), raw("250500000000000000000"));
        assert_eq!(parse_units(".5", 2).unwrap(), raw("50"));
        assert_eq!(parse_units("0", 18).unwrap(), U256::ZERO);
        assert_eq!(parse_units(" 12 ", 0).unwrap(), raw("12"));
    }

    #[test]
    fn test_parse_units_rejects() {
        assert_eq!(parse_units("", 18), Err(UnitsError::Empty));
        assert!(matches!(parse_units("-1", 18), Err(UnitsError::Negative(_))));
        assert!(matches!(parse_units("1e5", 18), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_units("1.2.3", 18), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_units(".", 18), Err(UnitsError::Invalid(_))));
        assert!(matches!(parse_units("1.234", 2), Err(UnitsError::TooPrecise(_, 2))));
    }

    #[test]
    fn test_round_trip_display() {
        let value = parse_units("1.2345", 18).unwrap();
        assert_eq!(format_units(value, 18), "1.2345");
    }
}

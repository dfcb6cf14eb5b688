//! Decimal and raw-unit amount handling
//!
//! Raw balances are integer strings in the token's smallest unit. Scaling
//! between raw and decimal strings is done with integer arithmetic only;
//! `f64` is used for display and USD valuation, never to build transfers.

use thiserror::Error;

/// Highest decimals value whose scale factor still fits in a u128
const MAX_DECIMALS: u8 = 38;

/// Fractional digits kept when converting a USD amount into token units
const USD_CONVERSION_PRECISION: u8 = 9;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("Amount is empty")]
    Empty,

    #[error("Invalid amount: {0}")]
    Invalid(String),

    #[error("Amount must be greater than zero")]
    NotPositive,

    #[error("Amount has more than {0} decimal places")]
    TooManyDecimals(u8),

    #[error("Amount is too large")]
    Overflow,

    #[error("Cannot convert USD amount: token market price is zero")]
    ZeroPrice,

    #[error("Cannot convert USD amount: invalid market price")]
    InvalidPrice,
}

fn scale_factor(decimals: u8) -> Result<u128, AmountError> {
    if decimals > MAX_DECIMALS {
        return Err(AmountError::Overflow);
    }
    10u128.checked_pow(decimals as u32).ok_or(AmountError::Overflow)
}

/// Split a plain decimal string into integer and fractional digit runs
fn split_decimal(amount: &str) -> Result<(&str, &str), AmountError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(AmountError::Empty);
    }

    let (int_part, frac_part) = match amount.split_once('.') {
        Some((i, f)) => (i, f),
        None => (amount, ""),
    };

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) || (int_part.is_empty() && frac_part.is_empty()) {
        return Err(AmountError::Invalid(amount.to_string()));
    }

    Ok((int_part, frac_part))
}

/// Check that `amount` is a finite decimal string strictly greater than zero
pub fn validate_positive_decimal(amount: &str) -> Result<(), AmountError> {
    let (int_part, frac_part) = split_decimal(amount)?;
    let non_zero = int_part.bytes().chain(frac_part.bytes()).any(|b| b != b'0');
    if non_zero {
        Ok(())
    } else {
        Err(AmountError::NotPositive)
    }
}

/// Scale a decimal string to raw integer units
pub fn parse_units(amount: &str, decimals: u8) -> Result<u128, AmountError> {
    let (int_part, frac_part) = split_decimal(amount)?;

    let frac_part = frac_part.trim_end_matches('0');
    if frac_part.len() > decimals as usize {
        return Err(AmountError::TooManyDecimals(decimals));
    }

    let scale = scale_factor(decimals)?;
    let int_value: u128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| AmountError::Overflow)?
    };

    let frac_value: u128 = if frac_part.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac_part, width = decimals as usize);
        padded.parse().map_err(|_| AmountError::Overflow)?
    };

    int_value
        .checked_mul(scale)
        .and_then(|v| v.checked_add(frac_value))
        .ok_or(AmountError::Overflow)
}

/// Render raw integer units as a decimal string without trailing zeros
pub fn format_units(raw: u128, decimals: u8) -> Result<String, AmountError> {
    let scale = scale_factor(decimals)?;
    let int_part = raw / scale;
    let frac_part = raw % scale;

    if frac_part == 0 {
        return Ok(int_part.to_string());
    }

    let frac = format!("{:0>width$}", frac_part, width = decimals as usize);
    Ok(format!("{}.{}", int_part, frac.trim_end_matches('0')))
}

/// Balance with decimals applied, for display and valuation only
pub fn human_balance(raw_balance: &str, decimals: u8) -> f64 {
    match raw_balance.trim().parse::<f64>() {
        Ok(raw) => raw / 10f64.powi(decimals as i32),
        Err(_) => 0.0,
    }
}

/// Convert a USD amount into a token-unit decimal string at `market_price`.
///
/// The result is truncated (never rounded up) to the token's decimals, capped
/// at nine fractional digits.
pub fn usd_to_token_amount(
    amount_usd: &str,
    market_price: f64,
    decimals: u8,
) -> Result<String, AmountError> {
    validate_positive_decimal(amount_usd)?;

    if market_price == 0.0 {
        return Err(AmountError::ZeroPrice);
    }
    if !market_price.is_finite() || market_price < 0.0 {
        return Err(AmountError::InvalidPrice);
    }

    let usd: f64 = amount_usd
        .trim()
        .parse()
        .map_err(|_| AmountError::Invalid(amount_usd.to_string()))?;

    let tokens = usd / market_price;
    if !tokens.is_finite() {
        return Err(AmountError::Overflow);
    }

    let precision = decimals.min(USD_CONVERSION_PRECISION);
    let scaled = (tokens * 10f64.powi(precision as i32)).floor();
    if scaled >= u128::MAX as f64 {
        return Err(AmountError::Overflow);
    }

    let raw = scaled as u128;
    if raw == 0 {
        return Err(AmountError::NotPositive);
    }

    format_units(raw, precision)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units_exact_scaling() {
        assert_eq!(parse_units("1", 9).unwrap(), 1_000_000_000);
        assert_eq!(parse_units("0.5", 6).unwrap(), 500_000);
        assert_eq!(parse_units(".25", 2).unwrap(), 25);
        assert_eq!(parse_units("1.230", 2).unwrap(), 123);
        assert_eq!(
            parse_units("123456789.123456789", 18).unwrap(),
            123_456_789_123_456_789_000_000_000
        );
    }

    #[test]
    fn test_parse_units_rejects_bad_input() {
        assert_eq!(parse_units("", 6), Err(AmountError::Empty));
        assert!(matches!(parse_units("-1", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_units("1e5", 6), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_units(".", 6), Err(AmountError::Invalid(_))));
        assert_eq!(parse_units("0.1234567", 6), Err(AmountError::TooManyDecimals(6)));
        assert_eq!(parse_units("1", 40), Err(AmountError::Overflow));
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_units(1_500_000_000, 9).unwrap(), "1.5");
        assert_eq!(format_units(5_000, 9).unwrap(), "0.000005");
        assert_eq!(format_units(42, 0).unwrap(), "42");
        assert_eq!(format_units(0, 18).unwrap(), "0");
    }

    #[test]
    fn test_validate_positive_decimal() {
        assert!(validate_positive_decimal("0.001").is_ok());
        assert_eq!(validate_positive_decimal("0.000"), Err(AmountError::NotPositive));
        assert!(matches!(validate_positive_decimal("abc"), Err(AmountError::Invalid(_))));
        assert!(matches!(validate_positive_decimal("inf"), Err(AmountError::Invalid(_))));
        assert!(matches!(validate_positive_decimal("NaN"), Err(AmountError::Invalid(_))));
    }

    #[test]
    fn test_usd_conversion() {
        assert_eq!(usd_to_token_amount("100", 50.0, 9).unwrap(), "2");
        assert_eq!(usd_to_token_amount("1", 3.0, 6).unwrap(), "0.333333");
    }

    #[test]
    fn test_usd_conversion_zero_price_guard() {
        assert_eq!(usd_to_token_amount("100", 0.0, 9), Err(AmountError::ZeroPrice));
        assert_eq!(usd_to_token_amount("100", -0.0, 9), Err(AmountError::ZeroPrice));
        assert_eq!(usd_to_token_amount("100", f64::NAN, 9), Err(AmountError::InvalidPrice));
    }

    #[test]
    fn test_human_balance() {
        assert!((human_balance("2500000", 6) - 2.5).abs() < f64::EPSILON);
        assert_eq!(human_balance("garbage", 6), 0.0);
    }
}

//! Decimal scaling between human-readable amounts and token base units
//!
//! All arithmetic is done on `U256` so amounts never pass through floating point.

use crate::error::{BridgeError, BridgeResult};

use alloy_primitives::U256;

/// Fractional digits used for quoted destination amounts
pub const DISPLAY_DECIMALS: u8 = 6;

/// Fractional digits used when rendering balances
pub const BALANCE_DISPLAY_DECIMALS: u8 = 4;

/// Largest token precision accepted by the converter
pub const MAX_DECIMALS: u8 = 36;

fn ten_pow(exp: u8) -> U256 {
    let ten = U256::from(10u64);
    (0..exp).fold(U256::from(1u64), |acc, _| acc * ten)
}

fn check_decimals(decimals: u8) -> BridgeResult<()> {
    if decimals > MAX_DECIMALS {
        return Err(BridgeError::InvalidAmount(format!(
            "unsupported token precision: {} decimals",
            decimals
        )));
    }
    Ok(())
}

/// Split a human amount into its integer and fractional digit strings
fn split_decimal(human: &str) -> BridgeResult<(&str, &str)> {
    let human = human.trim();
    let (int, frac) = human.split_once('.').unwrap_or((human, ""));

    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int.is_empty() && frac.is_empty()) || !all_digits(int) || !all_digits(frac) {
        return Err(BridgeError::InvalidAmount(human.to_string()));
    }

    Ok((int, frac))
}

fn parse_base(base: &str) -> BridgeResult<U256> {
    let base = base.trim();
    if base.is_empty() || !base.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BridgeError::InvalidAmount(base.to_string()));
    }
    U256::from_str_radix(base, 10).map_err(|e| BridgeError::InvalidAmount(e.to_string()))
}

fn insert_point(value: U256, precision: u8) -> String {
    let digits = value.to_string();
    if precision == 0 {
        return digits;
    }
    let precision = precision as usize;
    let padded = format!("{:0>width$}", digits, width = precision + 1);
    let (int, frac) = padded.split_at(padded.len() - precision);
    format!("{}.{}", int, frac)
}

/// Check that a string is a well-formed non-negative decimal amount
pub fn validate(human: &str) -> BridgeResult<()> {
    split_decimal(human).map(|_| ())
}

/// True when the amount parses and is strictly greater than zero
pub fn is_positive(human: &str) -> bool {
    match split_decimal(human) {
        Ok((int, frac)) => int.bytes().chain(frac.bytes()).any(|b| b != b'0'),
        Err(_) => false,
    }
}

/// Convert a human amount to an integer base-unit string.
///
/// Fractional digits beyond the token's precision are truncated.
pub fn to_base_units(human: &str, decimals: u8) -> BridgeResult<String> {
    to_base_value(human, decimals).map(|v| v.to_string())
}

fn to_base_value(human: &str, decimals: u8) -> BridgeResult<U256> {
    check_decimals(decimals)?;
    let (int, frac) = split_decimal(human)?;

    let scale = decimals as usize;
    let frac: String = frac.chars().take(scale).collect();
    let digits = format!("{}{:0<width$}", int, frac, width = scale);
    if digits.is_empty() {
        return Ok(U256::ZERO);
    }

    U256::from_str_radix(&digits, 10).map_err(|e| BridgeError::InvalidAmount(e.to_string()))
}

/// Render a base-unit value as a human amount with trailing zeros trimmed
pub fn format_base_units(value: U256, decimals: u8) -> String {
    let divisor = ten_pow(decimals.min(MAX_DECIMALS));
    let quotient = value / divisor;
    let remainder = value % divisor;

    if remainder.is_zero() {
        return quotient.to_string();
    }

    let remainder = format!("{:0>width$}", remainder.to_string(), width = decimals as usize);
    format!("{}.{}", quotient, remainder.trim_end_matches('0'))
}

/// Convert an integer base-unit string to a human amount
pub fn from_base_units(base: &str, decimals: u8) -> BridgeResult<String> {
    check_decimals(decimals)?;
    Ok(format_base_units(parse_base(base)?, decimals))
}

fn format_fixed_value(value: U256, decimals: u8, precision: u8) -> String {
    let scaled = if decimals > precision {
        let divisor = ten_pow(decimals - precision);
        value.saturating_add(divisor / U256::from(2u64)) / divisor
    } else {
        value * ten_pow(precision - decimals)
    };
    insert_point(scaled, precision)
}

/// Render base units with exactly `precision` fractional digits, rounding half up
pub fn format_fixed(base: &str, decimals: u8, precision: u8) -> BridgeResult<String> {
    check_decimals(decimals)?;
    Ok(format_fixed_value(parse_base(base)?, decimals, precision))
}

/// Compute `percentage`% of a human balance, exact to the token's precision
pub fn percentage_of(balance: &str, percentage: u8, decimals: u8) -> BridgeResult<String> {
    if percentage > 100 {
        return Err(BridgeError::InvalidAmount(format!(
            "percentage {} exceeds 100",
            percentage
        )));
    }

    let base = to_base_value(balance, decimals)?;
    let portion = base * U256::from(percentage) / U256::from(100u64);
    Ok(format_base_units(portion, decimals))
}

/// Format a balance for display: `0`, `< 0.0001`, or four fractional digits
pub fn format_balance(balance: &str) -> String {
    let Ok((_, frac)) = split_decimal(balance) else {
        return "0".to_string();
    };

    let scale = (frac.len() as u8)
        .max(BALANCE_DISPLAY_DECIMALS)
        .min(MAX_DECIMALS);
    let Ok(value) = to_base_value(balance, scale) else {
        return "0".to_string();
    };

    if value.is_zero() {
        return "0".to_string();
    }
    if value < ten_pow(scale - BALANCE_DISPLAY_DECIMALS) {
        return "< 0.0001".to_string();
    }

    format_fixed_value(value, scale, BALANCE_DISPLAY_DECIMALS)
}

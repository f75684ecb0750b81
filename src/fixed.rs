//! Signed 18-decimal fixed-point vote magnitudes.
//!
//! A ledger value `v` represents `v / SCALE` votes; its sign is the
//! direction (positive supports, negative opposes).  Values are committed to
//! the sparse ledger as 32-byte big-endian two's-complement words so that a
//! negative position hashes exactly as the state machine interprets it.
//!
//! The quadratic price of holding a position is
//!
//! ```text
//! cost(v) = v * v / SCALE
//! ```
//!
//! which is even in `v` and expressed in the same fixed-point unit as the
//! credits it is paid in.  The square is taken in 256-bit arithmetic and any
//! result that does not fit the 128-bit credit domain is rejected rather than
//! truncated.

use crate::error::{BallotError, Result};
use primitive_types::U256;

/// Fixed-point scale factor (10^18).
pub const SCALE: i128 = 1_000_000_000_000_000_000;

/// Number of decimal places carried by [`SCALE`].
pub const DECIMALS: usize = 18;

/// Width of the encoded leaf value.
pub const VALUE_BYTES: usize = 32;

/// The DEFAULT leaf value: no position.
pub const DEFAULT_VALUE: i128 = 0;

/// Quadratic credit cost of holding position `v`.
///
/// ```
/// use quadratic_ballot::fixed::{cost, SCALE};
///
/// assert_eq!(cost(5 * SCALE).unwrap(), 25 * SCALE as u128);
/// assert_eq!(cost(-5 * SCALE).unwrap(), 25 * SCALE as u128);
/// ```
pub fn cost(v: i128) -> Result<u128> {
    let magnitude = U256::from(v.unsigned_abs());
    let square = magnitude
        .checked_mul(magnitude)
        .ok_or_else(|| BallotError::ArithmeticOverflow(format!("square of {v}")))?;
    let scaled = square / U256::from(SCALE as u128);
    if scaled.bits() > 128 {
        return Err(BallotError::ArithmeticOverflow(format!(
            "cost of {v} exceeds the credit range"
        )));
    }
    Ok(scaled.low_u128())
}

/// Encodes `v` as a sign-extended 32-byte big-endian word.
pub fn encode_value(v: i128) -> [u8; VALUE_BYTES] {
    let fill = if v < 0 { 0xff } else { 0x00 };
    let mut out = [fill; VALUE_BYTES];
    out[VALUE_BYTES - 16..].copy_from_slice(&v.to_be_bytes());
    out
}

/// Parses a decimal vote count such as `"-2.5"` into fixed point.
pub fn parse_votes(input: &str) -> Result<i128> {
    let text = input.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (whole, frac) = body.split_once('.').unwrap_or((body, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(BallotError::Decode(format!("empty vote amount {input:?}")));
    }
    if frac.len() > DECIMALS {
        return Err(BallotError::Decode(format!(
            "{input} carries more than {DECIMALS} decimals"
        )));
    }
    let digits = |part: &str| -> Result<i128> {
        if part.is_empty() {
            return Ok(0);
        }
        if !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(BallotError::Decode(format!("invalid vote amount {input:?}")));
        }
        part.parse::<i128>()
            .map_err(|_| BallotError::ArithmeticOverflow(format!("vote amount {input}")))
    };
    let whole = digits(whole)?;
    let padded = format!("{frac:0<width$}", width = DECIMALS);
    let frac = digits(&padded)?;
    let magnitude = whole
        .checked_mul(SCALE)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| BallotError::ArithmeticOverflow(format!("vote amount {input}")))?;
    Ok(if negative { -magnitude } else { magnitude })
}

/// Formats a fixed-point value as a decimal vote count with trailing zeros trimmed.
pub fn format_votes(v: i128) -> String {
    let sign = if v < 0 { "-" } else { "" };
    let magnitude = v.unsigned_abs();
    let scale = SCALE as u128;
    let whole = magnitude / scale;
    let frac = magnitude % scale;
    if frac == 0 {
        return format!("{sign}{whole}");
    }
    let frac = format!("{frac:0>width$}", width = DECIMALS);
    format!("{sign}{whole}.{}", frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_matches_withdraw_refund_example() {
        let before = cost(5 * SCALE).unwrap();
        let after = cost(5 * SCALE / 2).unwrap();
        assert_eq!(before - after, 18_750_000_000_000_000_000);
    }

    #[test]
    fn cost_rejects_overflow() {
        assert!(matches!(
            cost(i128::MAX),
            Err(BallotError::ArithmeticOverflow(_))
        ));
        assert!(matches!(
            cost(i128::MIN),
            Err(BallotError::ArithmeticOverflow(_))
        ));
    }

    #[test]
    fn negative_values_sign_extend() {
        let word = encode_value(-1);
        assert!(word.iter().all(|b| *b == 0xff));
        assert_eq!(word[VALUE_BYTES - 16..], (-1i128).to_be_bytes());
        let word = encode_value(0x1f40);
        assert_eq!(word[30..], [0x1f, 0x40]);
        assert!(word[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn parse_and_format_votes() {
        assert_eq!(parse_votes("2.5").unwrap(), 5 * SCALE / 2);
        assert_eq!(parse_votes("-3").unwrap(), -3 * SCALE);
        assert_eq!(parse_votes(".25").unwrap(), SCALE / 4);
        assert!(parse_votes("1.2.3").is_err());
        assert!(parse_votes("").is_err());
        assert_eq!(format_votes(18_750_000_000_000_000_000), "18.75");
        assert_eq!(format_votes(-2 * SCALE), "-2");
        assert_eq!(format_votes(1), "0.000000000000000001");
    }
}

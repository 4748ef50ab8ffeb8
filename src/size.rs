//! Human byte-size strings such as `"500K"` or `"1.5G"`.

use crate::error::{Error, Result};

/// Recognized unit suffixes, each a power of 1024 above the previous one.
const UNITS: [char; 6] = ['B', 'K', 'M', 'G', 'T', 'P'];

/// Parse `"<number><unit>"` into a byte count.
///
/// The unit is a single trailing character from `B`, `K`, `M`, `G`, `T`, `P`
/// (case-insensitive). Whitespace around the string and between the number
/// and the unit is ignored. Fractional numbers are allowed and the result is
/// truncated: `"1.5G"` is `1_610_612_736`.
///
/// # Errors
///
/// Returns an invalid-format configuration error when the last character is
/// not a known unit or the numeric part is not a finite, non-negative number.
///
/// ```
/// use loop_daemon::size::parse_byte_size;
///
/// assert_eq!(parse_byte_size("2M").unwrap(), 2 * 1024 * 1024);
/// assert_eq!(parse_byte_size(" 2 m ").unwrap(), 2 * 1024 * 1024);
/// assert!(parse_byte_size("WHAT?").is_err());
/// ```
pub fn parse_byte_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let invalid = || Error::invalid_format(format!("Invalid memory string format, given: {trimmed}"));

    let mut chars = trimmed.chars();
    let unit = chars.next_back().ok_or_else(invalid)?.to_ascii_uppercase();
    let exponent = UNITS.iter().position(|&u| u == unit).ok_or_else(invalid)?;

    let number: f64 = chars.as_str().trim().parse().map_err(|_| invalid())?;
    if !number.is_finite() || number.is_sign_negative() {
        return Err(invalid());
    }

    // exponent is at most 5
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_sign_loss
    )]
    let bytes = (number * 1024_f64.powi(exponent as i32)) as u64;
    Ok(bytes)
}

//! Presentation formatting
//!
//! Pure helpers that turn fixed-point [`Quantity`] values, ratios, addresses
//! and durations into display strings. Amounts are handled as decimal digit
//! strings so no precision is lost before rounding.

use crate::error::FormatError;
use crate::types::Quantity;

/// Format a fixed-point amount with at most `display_decimals` fractional digits.
///
/// Rounds half-up, drops trailing zeros and groups the integer part with `,`:
/// `format_token_amount(1234500000000000000, 18, 4)` is `"1.2345"`.
pub fn format_token_amount(amount: Quantity, decimals: u8, display_decimals: usize) -> String {
    let decimals = decimals as usize;
    let digits = amount.to_string();

    // left-pad so there is at least one integer digit
    let padded = if digits.len() <= decimals {
        format!("{}{}", "0".repeat(decimals + 1 - digits.len()), digits)
    } else {
        digits
    };
    let split = padded.len() - decimals;

    let keep = display_decimals.min(decimals);
    let mut kept: Vec<u8> = padded.as_bytes()[..split + keep].to_vec();
    let round_up = padded
        .as_bytes()
        .get(split + keep)
        .map_or(false, |d| *d >= b'5');
    if round_up {
        increment_digits(&mut kept);
    }

    // a carry may have added a leading digit
    let int_len = kept.len() - keep;
    let (int_part, frac_part) = kept.split_at(int_len);
    let int_part = String::from_utf8_lossy(int_part);
    let frac_part = String::from_utf8_lossy(frac_part);
    let frac_part = frac_part.trim_end_matches('0');

    let grouped = group_thousands(int_part.trim_start_matches('0'));
    if frac_part.is_empty() {
        grouped
    } else {
        format!("{}.{}", grouped, frac_part)
    }
}

/// Parse a decimal display string back into a fixed-point amount.
///
/// Accepts `,` grouping in the integer part.
pub fn parse_token_amount(s: &str, decimals: u8) -> Result<Quantity, FormatError> {
    let trimmed = s.trim();
    let (int_part, frac_part) = match trimmed.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (trimmed, ""),
    };
    let int_part: String = int_part.chars().filter(|c| *c != ',').collect();

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(FormatError::InvalidAmount(s.to_string()));
    }
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if !all_digits(&int_part) || !all_digits(frac_part) {
        return Err(FormatError::InvalidAmount(s.to_string()));
    }
    if frac_part.len() > decimals as usize {
        return Err(FormatError::TooManyDecimals {
            found: frac_part.len(),
            max: decimals,
        });
    }

    let mut digits = int_part;
    digits.push_str(frac_part);
    digits.push_str(&"0".repeat(decimals as usize - frac_part.len()));
    let digits = digits.trim_start_matches('0');
    if digits.is_empty() {
        return Ok(Quantity::ZERO);
    }

    Quantity::from_str_radix(digits, 10).map_err(|_| FormatError::Overflow)
}

/// `0.12` → `"12.00%"` with two decimals.
pub fn format_percentage(ratio: f64, decimals: usize) -> String {
    let ratio = if ratio.is_finite() { ratio } else { 0.0 };
    format!("{:.*}%", decimals, ratio * 100.0)
}

/// Keep `chars` characters from each end of an address.
pub fn format_address(address: &str, chars: usize) -> String {
    if address.len() <= chars * 2 || !address.is_ascii() {
        return address.to_string();
    }
    format!(
        "{}...{}",
        &address[..chars],
        &address[address.len() - chars..]
    )
}

pub fn shorten_address(address: &str) -> String {
    format_address(address, 6)
}

/// Coarsest whole unit: `45s`, `3m`, `2h`, `5d`.
pub fn format_duration(seconds: u64) -> String {
    match seconds {
        s if s < 60 => format!("{}s", s),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3_600),
        s => format!("{}d", s / 86_400),
    }
}

/// Lossy conversion for derived values such as APR.
pub fn quantity_to_f64(q: Quantity) -> f64 {
    q.as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64)
}

fn increment_digits(digits: &mut Vec<u8>) {
    for d in digits.iter_mut().rev() {
        if *d == b'9' {
            *d = b'0';
        } else {
            *d += 1;
            return;
        }
    }
    digits.insert(0, b'1');
}

fn group_thousands(int_digits: &str) -> String {
    if int_digits.is_empty() {
        return "0".to_string();
    }
    let mut out = String::with_capacity(int_digits.len() + int_digits.len() / 3);
    for (i, c) in int_digits.chars().enumerate() {
        if i > 0 && (int_digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;

    fn wei(s: &str) -> Quantity {
        U256::from_str_radix(s, 10).unwrap()
    }

    #[test]
    fn test_format_token_amount() {
        assert_eq!(format_token_amount(wei("1234500000000000000"), 18, 4), "1.2345");
        assert_eq!(format_token_amount(wei("1000000000000000000"), 18, 4), "1");
        assert_eq!(format_token_amount(U256::ZERO, 18, 4), "0");
        assert_eq!(format_token_amount(wei("1500000"), 6, 2), "1.5");
    }

    #[test]
    fn test_format_rounds_half_up() {
        assert_eq!(format_token_amount(wei("1234550000000000000"), 18, 4), "1.2346");
        assert_eq!(format_token_amount(wei("1234549999999999999"), 18, 4), "1.2345");
        assert_eq!(format_token_amount(wei("999995000000000000"), 18, 4), "1");
        assert_eq!(format_token_amount(wei("50000000000000"), 18, 4), "0.0001");
        assert_eq!(format_token_amount(wei("49999999999999"), 18, 4), "0");
    }

    #[test]
    fn test_format_groups_thousands() {
        assert_eq!(
            format_token_amount(wei("1234567890000000000000000"), 18, 2),
            "1,234,567.89"
        );
        assert_eq!(format_token_amount(wei("999999500000000000000"), 18, 0), "1,000");
        assert_eq!(format_token_amount(wei("123"), 0, 4), "123");
    }

    #[test]
    fn test_format_max_value() {
        let formatted = format_token_amount(U256::MAX, 18, 4);
        assert!(formatted.starts_with("115,792,089,237"));
    }

    #[test]
    fn test_parse_token_amount() {
        assert_eq!(parse_token_amount("1.2345", 18).unwrap(), wei("1234500000000000000"));
        assert_eq!(parse_token_amount("1,000", 18).unwrap(), wei("1000000000000000000000"));
        assert_eq!(parse_token_amount(".5", 6).unwrap(), wei("500000"));
        assert_eq!(parse_token_amount("0", 18).unwrap(), U256::ZERO);
    }

    #[test]
    fn test_parse_token_amount_errors() {
        assert!(matches!(parse_token_amount("", 18), Err(FormatError::InvalidAmount(_))));
        assert!(matches!(parse_token_amount("1.2.3", 18), Err(FormatError::InvalidAmount(_))));
        assert!(matches!(parse_token_amount("-1", 18), Err(FormatError::InvalidAmount(_))));
        assert!(matches!(
            parse_token_amount("1.1234567", 6),
            Err(FormatError::TooManyDecimals { found: 7, max: 6 })
        ));
        let huge = format!("1{}", "0".repeat(80));
        assert!(matches!(parse_token_amount(&huge, 0), Err(FormatError::Overflow)));
    }

    #[test]
    fn test_format_then_parse_within_rounding_unit() {
        let unit = wei("100000000000000"); // 1e-4 at 18 decimals
        for raw in [
            "1234567890123456789",
            "999999999999999999",
            "42",
            "1234567890123456789012345",
        ] {
            let original = wei(raw);
            let parsed = parse_token_amount(&format_token_amount(original, 18, 4), 18).unwrap();
            let diff = if parsed > original {
                parsed - original
            } else {
                original - parsed
            };
            assert!(diff * U256::from(2u64) <= unit, "{} drifted by {}", raw, diff);
        }
    }

    #[test]
    fn test_format_percentage() {
        assert_eq!(format_percentage(0.12, 2), "12.00%");
        assert_eq!(format_percentage(0.0, 1), "0.0%");
        assert_eq!(format_percentage(f64::NAN, 2), "0.00%");
    }

    #[test]
    fn test_format_address() {
        let addr = "0x0742d35Cc6634C0532925a3b844Bc9e7595f0bEb";
        assert_eq!(format_address(addr, 4), "0x07...0bEb");
        assert_eq!(shorten_address(addr), "0x0742...5f0bEb");
        assert_eq!(format_address("0x1234", 4), "0x1234");
        assert_eq!(format_address("", 4), "");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(180), "3m");
        assert_eq!(format_duration(7_200), "2h");
        assert_eq!(format_duration(5 * 86_400 + 10), "5d");
    }

    #[test]
    fn test_quantity_to_f64() {
        assert_eq!(quantity_to_f64(U256::from(1_000_000u64)), 1_000_000.0);
        let one_eth = quantity_to_f64(wei("1000000000000000000"));
        assert!((one_eth - 1e18).abs() < 1.0);
        let big = quantity_to_f64(U256::from(1u64) << 128);
        assert!((big - 2f64.powi(128)).abs() / big < 1e-12);
    }
}

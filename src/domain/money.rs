use std::fmt;

/// Money is represented as integer cents to avoid floating-point precision issues.
/// 1 unit = 100 cents, so 50.00 = 5000 cents.
pub type Cents = i64;

/// Largest amount accepted for a single deposit or withdrawal (one billion units).
pub const MAX_TRANSACTION_CENTS: Cents = 100_000_000_000;

/// Format cents as a human-readable currency string.
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs_cents = cents.unsigned_abs();
    let units = abs_cents / 100;
    let remainder = abs_cents % 100;
    format!("{}{}.{:02}", sign, units, remainder)
}

/// Parse a decimal string into cents.
/// Example: "50.00" -> 5000, "12.5" -> 1250, "100" -> 10000
///
/// Anything finer than a cent is rejected rather than rounded. Amounts are
/// unsigned: the direction comes from the operation, so `+` and `-` are errors.
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let digits = input.trim();
    if digits.is_empty() {
        return Err(ParseCentsError::Empty);
    }
    if digits.starts_with(['+', '-']) {
        return Err(ParseCentsError::Signed);
    }

    let (units_str, fraction_str) = digits.split_once('.').unwrap_or((digits, ""));
    if units_str.is_empty() && fraction_str.is_empty() {
        return Err(ParseCentsError::InvalidFormat);
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(units_str) || !all_digits(fraction_str) {
        return Err(ParseCentsError::InvalidFormat);
    }
    if fraction_str.len() > 2 {
        return Err(ParseCentsError::TooManyDecimals);
    }

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        // Only digits remain, so a parse failure means the value is too large
        units_str.parse().map_err(|_| ParseCentsError::Overflow)?
    };

    let fraction: i64 = match fraction_str.len() {
        0 => 0,
        // "12.5" means 50 cents
        1 => i64::from(fraction_str.as_bytes()[0] - b'0') * 10,
        _ => fraction_str
            .parse()
            .map_err(|_| ParseCentsError::InvalidFormat)?,
    };

    let cents = units
        .checked_mul(100)
        .and_then(|c| c.checked_add(fraction))
        .ok_or(ParseCentsError::Overflow)?;
    Ok(cents)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCentsError {
    Empty,
    Signed,
    InvalidFormat,
    TooManyDecimals,
    Overflow,
}

impl fmt::Display for ParseCentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCentsError::Empty => write!(f, "amount is empty"),
            ParseCentsError::Signed => write!(f, "amount must not have a sign"),
            ParseCentsError::InvalidFormat => write!(f, "invalid money format"),
            ParseCentsError::TooManyDecimals => {
                write!(f, "amount has more than two decimal places")
            }
            ParseCentsError::Overflow => write!(f, "amount is too large"),
        }
    }
}

impl std::error::Error for ParseCentsError {}

/// Serde adapter rendering cents as a decimal string ("12.34") on the wire.
pub mod decimal_string {
    use serde::{Deserialize, Deserializer, Serializer, de};

    use super::{Cents, format_cents, parse_cents};

    pub fn serialize<S: Serializer>(cents: &Cents, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_cents(*cents))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Cents, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_cents(&text).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(5000), "50.00");
        assert_eq!(format_cents(1234), "12.34");
        assert_eq!(format_cents(1), "0.01");
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(-5000), "-50.00");
        assert_eq!(format_cents(-1), "-0.01");
    }

    #[test]
    fn test_parse_cents() {
        assert_eq!(parse_cents("50.00"), Ok(5000));
        assert_eq!(parse_cents("50"), Ok(5000));
        assert_eq!(parse_cents("12.5"), Ok(1250));
        assert_eq!(parse_cents("0.01"), Ok(1));
        assert_eq!(parse_cents(".50"), Ok(50));
        assert_eq!(parse_cents("7."), Ok(700));
        assert_eq!(parse_cents(" 3.10 "), Ok(310));
    }

    #[test]
    fn test_parse_cents_rejects_sub_cent_precision() {
        assert_eq!(parse_cents("100.999"), Err(ParseCentsError::TooManyDecimals));
        assert_eq!(parse_cents("0.001"), Err(ParseCentsError::TooManyDecimals));
    }

    #[test]
    fn test_parse_cents_invalid() {
        assert_eq!(parse_cents(""), Err(ParseCentsError::Empty));
        assert_eq!(parse_cents("  "), Err(ParseCentsError::Empty));
        assert_eq!(parse_cents("."), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("abc"), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("12.34.56"), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("1e5"), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("NaN"), Err(ParseCentsError::InvalidFormat));
        assert_eq!(
            parse_cents("99999999999999999999"),
            Err(ParseCentsError::Overflow)
        );
    }

    #[test]
    fn test_parse_cents_rejects_signs() {
        assert_eq!(parse_cents("+3.10"), Err(ParseCentsError::Signed));
        assert_eq!(parse_cents(" -50.00"), Err(ParseCentsError::Signed));
        assert_eq!(parse_cents("-"), Err(ParseCentsError::Signed));
        assert_eq!(parse_cents("-0"), Err(ParseCentsError::Signed));
    }

    #[test]
    fn test_decimal_string_serde() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Wrapper {
            #[serde(with = "decimal_string")]
            amount: Cents,
        }

        let json = serde_json::to_string(&Wrapper { amount: 1050 }).unwrap();
        assert_eq!(json, r#"{"amount":"10.50"}"#);

        let back: Wrapper = serde_json::from_str(r#"{"amount":"0.07"}"#).unwrap();
        assert_eq!(back, Wrapper { amount: 7 });
    }
}

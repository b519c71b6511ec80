use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration: '{0}'")]
    Invalid(String),
    #[error("duration must be greater than zero: '{0}'")]
    Zero(String),
    #[error("duration overflows: '{0}'")]
    Overflow(String),
}

fn component_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([0-9]+)([smhdw])").unwrap())
}

/// Parse a compact duration such as `"30m"`, `"1d"` or `"1h30m"`.
///
/// Components are summed. Units are `s`, `m`, `h`, `d` and `w`.
pub fn parse(input: &str) -> Result<Duration, DurationError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DurationError::Empty);
    }

    let mut total: u64 = 0;
    let mut consumed = 0;
    for caps in component_regex().captures_iter(input) {
        let whole = caps.get(0).unwrap();
        // components must be contiguous, no stray characters in between
        if whole.start() != consumed {
            return Err(DurationError::Invalid(input.to_owned()));
        }
        consumed = whole.end();

        let amount: u64 = caps[1]
            .parse()
            .map_err(|_| DurationError::Overflow(input.to_owned()))?;
        let unit = match &caps[2] {
            "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            "w" => 7 * 24 * 60 * 60,
            _ => unreachable!(),
        };
        total = amount
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| DurationError::Overflow(input.to_owned()))?;
    }

    if consumed != input.len() {
        return Err(DurationError::Invalid(input.to_owned()));
    }
    if total == 0 {
        return Err(DurationError::Zero(input.to_owned()));
    }

    Ok(Duration::from_secs(total))
}

/// Serde adapter for config fields written in the compact syntax.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_units() {
        assert_eq!(parse("45s"), Ok(Duration::from_secs(45)));
        assert_eq!(parse("30m"), Ok(Duration::from_secs(30 * 60)));
        assert_eq!(parse("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse("1d"), Ok(Duration::from_secs(86_400)));
        assert_eq!(parse("1w"), Ok(Duration::from_secs(604_800)));
    }

    #[test]
    fn sums_components() {
        assert_eq!(parse("1h30m"), Ok(Duration::from_secs(5400)));
        assert_eq!(parse("1d12h"), Ok(Duration::from_secs(129_600)));
        assert_eq!(parse(" 2m10s "), Ok(Duration::from_secs(130)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse(""), Err(DurationError::Empty));
        assert!(matches!(parse("1x"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse("h1"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse("1h 30m"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse("10"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse("0m"), Err(DurationError::Zero(_))));
        assert!(matches!(
            parse("99999999999999999999w"),
            Err(DurationError::Overflow(_))
        ));
    }

    #[test]
    fn only_ascii_digits_count() {
        assert!(matches!(parse("\u{663}h"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse("1\u{663}h"), Err(DurationError::Invalid(_))));
    }
}

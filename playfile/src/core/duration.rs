//! Parsing of human duration strings used in agent limits (`"25m"`, `"1h"`).

use std::time::Duration;

use anyhow::{Result, anyhow};

/// Parse a duration such as `"90s"`, `"25m"`, `"1h"` or `"1h30m"`.
///
/// A bare number is taken as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("empty duration"));
    }
    if let Ok(secs) = trimmed.parse::<u64>() {
        if secs == 0 {
            return Err(anyhow!("invalid duration '{raw}': must be > 0"));
        }
        return Ok(Duration::from_secs(secs));
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for ch in trimmed.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let unit = match ch {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            _ => return Err(anyhow!("invalid duration '{raw}': unknown unit '{ch}'")),
        };
        let value: u64 = digits
            .parse()
            .map_err(|_| anyhow!("invalid duration '{raw}': missing number before '{ch}'"))?;
        total = total.saturating_add(value.saturating_mul(unit));
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(anyhow!("invalid duration '{raw}': trailing number without unit"));
    }
    if total == 0 {
        return Err(anyhow!("invalid duration '{raw}': must be > 0"));
    }
    Ok(Duration::from_secs(total))
}

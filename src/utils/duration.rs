//! Duration parsing utilities.
//!
//! This module parses the link delay tokens found in manifest headers
//! (e.g., "20", "20ms", "1s") and formats them back into the canonical
//! form handed to the link shaper.

use std::time::Duration;

/// Parse a link delay token into a `Duration`
///
/// Supports various delay formats:
/// - Raw milliseconds: "20"
/// - Microseconds: "500us", "500usec"
/// - Milliseconds: "20ms", "20msec"
/// - Seconds: "1s", "1sec", "1secs"
/// - Minutes: "1m", "1min", "1mins"
///
/// # Examples
/// ```
/// use meshsim::utils::duration::parse_delay;
/// use std::time::Duration;
///
/// assert_eq!(parse_delay("20"), Ok(Duration::from_millis(20)));
/// assert_eq!(parse_delay("20ms"), Ok(Duration::from_millis(20)));
/// assert_eq!(parse_delay("1s"), Ok(Duration::from_secs(1)));
/// assert!(parse_delay("fast").is_err());
/// ```
pub fn parse_delay(token: &str) -> Result<Duration, String> {
    let token = token.trim();
    let (number, unit) = token.split_at(number_len(token));

    let value = number
        .parse::<u64>()
        .map_err(|_| format!("Invalid delay format: {}", token))?;

    // Longer suffixes first so "ms" is never read as "m"
    match unit {
        "" | "ms" | "msec" | "msecs" => Ok(Duration::from_millis(value)),
        "us" | "usec" | "usecs" => Ok(Duration::from_micros(value)),
        "s" | "sec" | "secs" | "second" | "seconds" => Ok(Duration::from_secs(value)),
        "m" | "min" | "mins" | "minute" | "minutes" => value
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("Delay out of range: {}", token)),
        _ => Err(format!("Invalid delay format: {}", token)),
    }
}

/// Format a delay the way `tc netem` expects it.
///
/// Whole milliseconds are written as "<n>ms", anything finer as "<n>us".
pub fn format_delay(delay: Duration) -> String {
    if delay.subsec_micros() % 1000 == 0 {
        format!("{}ms", delay.as_millis())
    } else {
        format!("{}us", delay.as_micros())
    }
}

/// Length of the leading run of ASCII digits
fn number_len(token: &str) -> usize {
    token
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(token.len())
}

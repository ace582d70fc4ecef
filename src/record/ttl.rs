//! ISO-8601 duration handling for record TTLs.
//!
//! The wire format is the `PnDTnHnMnS` subset (optionally with a week
//! component, which some publishers emit). Fractional components and
//! year/month designators are rejected: a TTL must be an exact span.

use chrono::Duration;
use std::fmt;

/// Error produced when a TTL string is not a usable ISO-8601 duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlParseError(String);

impl fmt::Display for TtlParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TtlParseError {}

/// Parses an ISO-8601 duration like `PT1H`, `P2DT30M` or `P1W`.
pub fn parse_duration(input: &str) -> Result<Duration, TtlParseError> {
    let err = |msg: &str| TtlParseError(format!("{msg}: '{input}'"));

    let rest = input
        .strip_prefix('P')
        .ok_or_else(|| err("duration must start with 'P'"))?;
    if rest.is_empty() {
        return Err(err("empty duration"));
    }

    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => (d, Some(t)),
        None => (rest, None),
    };
    if let Some(t) = time_part
        && t.is_empty()
    {
        return Err(err("'T' must be followed by a time component"));
    }

    let mut total = Duration::zero();
    let mut saw_component = false;

    for (number, designator) in components(date_part).map_err(|m| err(&m))? {
        saw_component = true;
        total = total + match designator {
            'W' => Duration::weeks(number),
            'D' => Duration::days(number),
            'Y' | 'M' => return Err(err("calendar designators are not supported")),
            other => return Err(err(&format!("unknown date designator '{other}'"))),
        };
    }

    if let Some(t) = time_part {
        for (number, designator) in components(t).map_err(|m| err(&m))? {
            saw_component = true;
            total = total + match designator {
                'H' => Duration::hours(number),
                'M' => Duration::minutes(number),
                'S' => Duration::seconds(number),
                other => return Err(err(&format!("unknown time designator '{other}'"))),
            };
        }
    }

    if !saw_component {
        return Err(err("duration has no components"));
    }

    Ok(total)
}

/// Splits `12H30M` into `[(12, 'H'), (30, 'M')]`.
fn components(part: &str) -> Result<Vec<(i64, char)>, String> {
    let mut out = Vec::new();
    let mut digits = String::new();

    for c in part.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if c == '.' || c == ',' {
            return Err("fractional components are not supported".to_string());
        } else {
            if digits.is_empty() {
                return Err(format!("designator '{c}' has no value"));
            }
            let number: i64 = digits
                .parse()
                .map_err(|_| format!("component value too large before '{c}'"))?;
            out.push((number, c));
            digits.clear();
        }
    }

    if !digits.is_empty() {
        return Err("trailing digits without a designator".to_string());
    }

    Ok(out)
}

/// Renders a duration in its normalized ISO-8601 form.
///
/// Sub-second precision is dropped; a zero duration renders as `PT0S`.
pub fn format_duration(duration: Duration) -> String {
    let mut secs = duration.num_seconds().max(0);

    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3_600;
    secs %= 3_600;
    let minutes = secs / 60;
    secs %= 60;

    let mut out = String::from("P");
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }
    if hours > 0 || minutes > 0 || secs > 0 || days == 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes > 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if secs > 0 || (hours == 0 && minutes == 0) {
            out.push_str(&format!("{secs}S"));
        }
    }
    out
}

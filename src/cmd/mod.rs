pub mod classify;
pub mod play;

use std::time::Duration;

use anyhow::Result;

/// Parse duration string like "1h", "30m", "1h30m", "500ms", "90" (seconds)
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut current_num = String::new();
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            current_num.push(c);
            continue;
        }

        let num: u64 = current_num.parse().unwrap_or(0);
        current_num.clear();

        match c {
            'h' => total += Duration::from_secs(num * 3600),
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                total += Duration::from_millis(num);
            }
            'm' => total += Duration::from_secs(num * 60),
            's' => total += Duration::from_secs(num),
            _ => anyhow::bail!(
                "Invalid duration: {s}. Use format like '500ms', '30s', '5m', '1h30m', or seconds."
            ),
        }
    }

    if !current_num.is_empty() {
        total += Duration::from_secs(current_num.parse::<u64>().unwrap_or(0));
    }

    if total.is_zero() {
        anyhow::bail!(
            "Invalid duration: {s}. Use format like '500ms', '30s', '5m', '1h30m', or seconds."
        );
    }

    Ok(total)
}

//! Human-readable formatting for durations, counts and sizes

/// Format a duration in seconds as `h:mm:ss` or `m:ss`; unknown or zero is `?`
pub fn format_duration(seconds: Option<f64>) -> String {
    let secs = match seconds {
        Some(s) if s > 0.0 => s as u64,
        _ => return "?".to_string(),
    };
    let (hours, rem) = (secs / 3600, secs % 3600);
    let (minutes, secs) = (rem / 60, rem % 60);
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Compact a count: 1_500_000 -> `1.5M`
pub fn format_number(n: u64) -> String {
    match n {
        n if n >= 1_000_000_000 => format!("{:.1}B", n as f64 / 1e9),
        n if n >= 1_000_000 => format!("{:.1}M", n as f64 / 1e6),
        n if n >= 1_000 => format!("{:.1}K", n as f64 / 1e3),
        n => n.to_string(),
    }
}

/// Decimal byte size: 1_500_000 -> `1.5 MB`
pub fn format_bytes(b: u64) -> String {
    match b {
        b if b >= 1_000_000_000 => format!("{:.1} GB", b as f64 / 1e9),
        b if b >= 1_000_000 => format!("{:.1} MB", b as f64 / 1e6),
        b if b >= 1_000 => format!("{:.1} KB", b as f64 / 1e3),
        b => format!("{} B", b),
    }
}

/// `YYYYMMDD` to `DD/MM/YYYY`; anything else passes through unchanged
pub fn format_upload_date(raw: &str) -> String {
    match chrono::NaiveDate::parse_from_str(raw, "%Y%m%d") {
        Ok(date) => date.format("%d/%m/%Y").to_string(),
        Err(_) => raw.to_string(),
    }
}

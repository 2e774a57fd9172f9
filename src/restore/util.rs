use anyhow::Result;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Truncate `input` to at most `max_chars` Unicode characters, stripping
/// control characters and appending `…` when truncated.
pub fn truncate_with_ellipsis(input: &str, max_chars: usize) -> String {
    let clean: String = input.chars().filter(|c| !c.is_control()).collect();
    if clean.chars().count() > max_chars {
        let mut s: String = clean.chars().take(max_chars).collect();
        s.push('…');
        s
    } else {
        clean
    }
}

/// Format a millisecond offset as `hh:mm:ss.mmm` for logs and reports.
pub fn format_progress_ms(ms: u64) -> String {
    let total_secs = ms / 1000;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        ms % 1000
    )
}

#[cfg(test)]
mod tests {
    use super::{format_progress_ms, truncate_with_ellipsis};

    #[test]
    fn format_progress_ms_renders_hours_minutes_seconds() {
        assert_eq!(format_progress_ms(0), "00:00:00.000");
        assert_eq!(format_progress_ms(3_723_456), "01:02:03.456");
    }

    #[test]
    fn truncate_keeps_short_input_untouched() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
    }

    #[test]
    fn truncate_appends_ellipsis() {
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc…");
    }
}

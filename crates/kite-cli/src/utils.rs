//! Shared utilities

use kite_ai::Usage;

/// Truncate a string to `max` characters, appending "..." if truncated.
/// Operates on Unicode char boundaries, not bytes.
pub fn truncate_chars(s: &str, max: usize) -> String {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max).collect();
    if chars.next().is_some() {
        format!("{}...", truncated)
    } else {
        truncated
    }
}

/// First line of `s`, shortened for one-line summaries
pub fn first_line(s: &str, max: usize) -> String {
    let line = s.lines().next().unwrap_or_default();
    let shortened = truncate_chars(line, max);
    if shortened.len() == line.len() && s.trim_end().contains('\n') {
        format!("{}...", shortened)
    } else {
        shortened
    }
}

/// `1234567` -> `1.2M`, `5400` -> `5.4k`
pub fn format_tokens(n: u64) -> String {
    match n {
        0..1_000 => n.to_string(),
        1_000..1_000_000 => format!("{:.1}k", n as f64 / 1_000.0),
        _ => format!("{:.1}M", n as f64 / 1_000_000.0),
    }
}

pub fn format_usage(usage: &Usage) -> String {
    let mut out = format!(
        "{} in, {} out",
        format_tokens(usage.prompt_tokens),
        format_tokens(usage.completion_tokens)
    );
    if usage.cached_tokens > 0 {
        out.push_str(&format!(", {} cached", format_tokens(usage.cached_tokens)));
    }
    out
}

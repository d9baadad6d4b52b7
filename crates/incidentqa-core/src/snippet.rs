//! Character-safe text clipping and matched-term excerpts.

const ELLIPSIS: &str = "...";

/// Trim and cap `s` at `limit` characters, ending with `...` when cut.
pub fn clip(s: &str, limit: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let keep = limit.saturating_sub(ELLIPSIS.len()).max(1);
    let head: String = s.chars().take(keep).collect();
    format!("{}{}", head.trim_end(), ELLIPSIS)
}

/// A window of at most `max_chars` characters around the earliest occurrence
/// of any of `terms` (case-insensitive). Falls back to [`clip`] when nothing
/// matches.
pub fn excerpt(text: &str, terms: &[String], max_chars: usize) -> String {
    let chars: Vec<char> = text.trim().chars().collect();
    if chars.len() <= max_chars {
        return chars.into_iter().collect();
    }
    let Some(hit) = earliest_match(&chars, terms) else {
        return clip(text, max_chars);
    };
    let lead = max_chars / 4;
    let start = hit.saturating_sub(lead).min(chars.len().saturating_sub(max_chars));
    let end = (start + max_chars).min(chars.len());
    let mut out = String::with_capacity(max_chars + 2 * ELLIPSIS.len());
    if start > 0 {
        out.push_str(ELLIPSIS);
    }
    out.extend(chars[start..end].iter());
    if end < chars.len() {
        out.push_str(ELLIPSIS);
    }
    out
}

fn earliest_match(chars: &[char], terms: &[String]) -> Option<usize> {
    let lowered: Vec<char> = chars.iter().map(|c| c.to_lowercase().next().unwrap_or(*c)).collect();
    terms
        .iter()
        .filter(|t| !t.is_empty())
        .filter_map(|t| {
            let needle: Vec<char> = t.to_lowercase().chars().collect();
            lowered.windows(needle.len()).position(|w| w == needle.as_slice())
        })
        .min()
}

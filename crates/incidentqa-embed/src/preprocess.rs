const HEAD_TAIL_JOIN: &str = "\n...\n";

/// Collapses horizontal whitespace, keeps at most one blank line between
/// paragraphs and bounds the input at roughly `max_chars`. Long inputs keep
/// their head and the last `tail_keep` characters, where the final error line
/// of a stack trace usually sits.
pub fn prepare_input(text: &str, max_chars: usize, tail_keep: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() && lines.last().map_or(true, |l| l.is_empty()) { continue; }
        lines.push(collapsed);
    }
    while lines.last().is_some_and(|l| l.is_empty()) { lines.pop(); }
    let normalized = lines.join("\n");

    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() <= max_chars { return normalized; }
    let tail = tail_keep.min(max_chars);
    let head = max_chars - tail;
    let mut out: String = chars[..head].iter().collect();
    out.push_str(HEAD_TAIL_JOIN);
    out.extend(chars[chars.len() - tail..].iter());
    out
}

pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 { for x in v.iter_mut() { *x /= norm; } }
}

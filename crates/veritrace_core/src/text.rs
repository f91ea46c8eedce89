//! Bounded text helpers for diagnostics.

/// Truncate `s` to at most `max_bytes`, cutting on a char boundary and
/// marking the cut with `...`.
#[must_use]
pub fn truncate_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    const MARK: &str = "...";
    let budget = max_bytes.saturating_sub(MARK.len());
    let mut end = budget;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + MARK.len());
    out.push_str(&s[..end]);
    if max_bytes >= MARK.len() {
        out.push_str(MARK);
    }
    out
}

/// Keep the last `max_bytes` of `s`, cutting on a char boundary and
/// marking the cut with a leading `...`.
///
/// Tool output usually carries the useful error at the end.
#[must_use]
pub fn tail_utf8(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    const MARK: &str = "...";
    let budget = max_bytes.saturating_sub(MARK.len());
    let mut start = s.len() - budget;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    let mut out = String::with_capacity(s.len() - start + MARK.len());
    if max_bytes >= MARK.len() {
        out.push_str(MARK);
    }
    out.push_str(&s[start..]);
    out
}

//! Bounding command output before it is embedded in a prompt.

pub const TRUNCATION_MARKER: &str = "[Output truncated]";

/// Keep at most `max_lines` lines of `text`.
///
/// When lines are dropped, the kept head is followed by a line naming how many
/// lines were elided and [`TRUNCATION_MARKER`].
pub fn truncate_lines(text: &str, max_lines: usize) -> String {
    let total = text.lines().count();
    if total <= max_lines {
        return text.to_string();
    }
    let mut kept: Vec<&str> = text.lines().take(max_lines).collect();
    let elided = format!("... {} more lines {TRUNCATION_MARKER}", total - max_lines);
    kept.push(&elided);
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_unchanged() {
        assert_eq!(truncate_lines("a\nb\n", 5), "a\nb\n");
        assert_eq!(truncate_lines("", 0), "");
    }

    #[test]
    fn long_output_is_cut_with_marker() {
        let text: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        let out = truncate_lines(&text, 3);
        assert_eq!(out, "line 1\nline 2\nline 3\n... 7 more lines [Output truncated]");
        assert_eq!(out.lines().count(), 4);
    }
}

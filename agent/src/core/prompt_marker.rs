//! One-shot detection of interactive prompts in streamed command output.

/// Watches accumulated output for a prompt marker and fires at most once.
///
/// Matching is case-insensitive over everything seen so far, so a marker split
/// across two reads is still found.
#[derive(Debug, Clone)]
pub struct PromptWatcher {
    markers: Vec<String>,
    seen: String,
    fired: bool,
}

impl PromptWatcher {
    pub fn new<S: AsRef<str>>(markers: &[S]) -> Self {
        Self {
            markers: markers
                .iter()
                .map(|m| m.as_ref().trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
            seen: String::new(),
            fired: false,
        }
    }

    /// Feed a chunk of output. Returns `true` only on the first chunk that
    /// completes a marker match; later matches return `false`.
    pub fn observe(&mut self, chunk: &str) -> bool {
        if self.fired || chunk.is_empty() {
            return false;
        }
        self.seen.push_str(&chunk.to_lowercase());
        if self.markers.iter().any(|marker| self.seen.contains(marker)) {
            self.fired = true;
            self.seen.clear();
            return true;
        }
        self.trim_seen();
        false
    }

    pub fn fired(&self) -> bool {
        self.fired
    }

    /// Keep only enough tail to complete a marker split across chunks.
    fn trim_seen(&mut self) {
        let keep = self.markers.iter().map(String::len).max().unwrap_or(0);
        if self.seen.len() <= keep {
            return;
        }
        let mut cut = self.seen.len() - keep;
        while !self.seen.is_char_boundary(cut) {
            cut -= 1;
        }
        self.seen.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher() -> PromptWatcher {
        PromptWatcher::new(&["password", "[sudo]"])
    }

    #[test]
    fn fires_once_on_first_marker() {
        let mut w = watcher();
        assert!(!w.observe("Matching Defaults entries\n"));
        assert!(w.observe("[sudo] password for kali: "));
        assert!(w.fired());
        assert!(!w.observe("Sorry, try again.\n[sudo] password for kali: "));
    }

    #[test]
    fn blank_markers_never_match() {
        let mut w = PromptWatcher::new(&["password", " ", "\t"]);
        assert!(!w.observe("total 12 drwxr-xr-x 2 root root"));
        assert!(w.observe("Password: "));
    }

    #[test]
    fn matches_case_insensitively() {
        let mut w = watcher();
        assert!(w.observe("Enter PASSWORD:"));
    }

    #[test]
    fn matches_marker_split_across_chunks() {
        let mut w = watcher();
        assert!(!w.observe("user's pass"));
        assert!(w.observe("word: "));
    }

    #[test]
    fn long_output_without_marker_never_fires() {
        let mut w = watcher();
        for _ in 0..1000 {
            assert!(!w.observe("drwxr-xr-x 2 root root 4096 ünïcode\n"));
        }
        assert!(!w.fired());
    }
}

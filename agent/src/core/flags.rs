//! Flag detection and the monotonically growing flag set.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static FLAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)flag\{[^}\n]*\}").expect("flag pattern should compile"));

/// All flag tokens in `text`, lowercased, in order of appearance.
pub fn find_flags(text: &str) -> Vec<String> {
    FLAG_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Unique discovered flags. Never shrinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlagSet {
    flags: BTreeSet<String>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every flag in `text`. Returns the flags that were new.
    pub fn detect(&mut self, text: &str) -> Vec<String> {
        find_flags(text)
            .into_iter()
            .filter(|flag| self.flags.insert(flag.clone()))
            .collect()
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.flags.contains(&flag.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.flags.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_flag_once_case_folded() {
        let mut flags = FlagSet::new();
        let output = "root@box:~# cat flag.txt\nFLAG{abc123}\n";

        assert_eq!(flags.detect(output), vec!["flag{abc123}"]);
        assert!(flags.contains("flag{abc123}"));
        assert_eq!(flags.len(), 1);

        assert!(flags.detect(output).is_empty());
        assert!(flags.detect("again flag{abc123}").is_empty());
        assert_eq!(flags.len(), 1);
    }

    #[test]
    fn ignores_text_without_closing_brace() {
        assert!(find_flags("flag{ never closed").is_empty());
        assert!(find_flags("no flags here, just flag.txt").is_empty());
    }

    #[test]
    fn multiple_flags_in_one_text() {
        let mut flags = FlagSet::new();
        let new = flags.detect("flag{one} and Flag{two} and flag{one}");
        assert_eq!(new, vec!["flag{one}", "flag{two}"]);
        assert_eq!(flags.iter().collect::<Vec<_>>(), vec!["flag{one}", "flag{two}"]);
    }
}

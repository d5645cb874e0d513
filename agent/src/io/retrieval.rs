//! Command-corpus lookup used for planner hints.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Text-in, snippets-out lookup over a reference corpus.
pub trait Retriever {
    fn query(&self, text: &str) -> Vec<String>;
}

#[derive(Debug, Clone)]
struct Entry {
    command: String,
    tokens: HashSet<String>,
}

/// Keyword-overlap index over a `{"category": ["command", ...]}` corpus.
///
/// An entry's tokens are its category's tokens plus its command's tokens.
/// Ties keep corpus order (categories sorted by name, commands as listed).
#[derive(Debug, Clone, Default)]
pub struct KeywordIndex {
    entries: Vec<Entry>,
    k: usize,
}

impl KeywordIndex {
    pub fn from_json(raw: &str, k: usize) -> Result<Self> {
        let corpus: BTreeMap<String, Vec<String>> =
            serde_json::from_str(raw).context("parse command corpus json")?;
        let mut entries = Vec::new();
        for (category, commands) in corpus {
            let category_tokens = tokenize(&category);
            for command in commands {
                let command = command.trim().to_string();
                if command.is_empty() {
                    continue;
                }
                let mut tokens = tokenize(&command);
                tokens.extend(category_tokens.iter().cloned());
                entries.push(Entry { command, tokens });
            }
        }
        Ok(Self { entries, k })
    }

    pub fn load(path: &Path, k: usize) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let index = Self::from_json(&raw, k).with_context(|| format!("load {}", path.display()))?;
        debug!(path = %path.display(), entries = index.len(), "loaded command corpus");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Retriever for KeywordIndex {
    fn query(&self, text: &str) -> Vec<String> {
        let wanted = tokenize(text);
        if wanted.is_empty() || self.k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(usize, usize)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.tokens.intersection(&wanted).count(), idx))
            .filter(|(score, _)| *score > 0)
            .collect();
        // Stable sort keeps corpus order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(self.k)
            .map(|(_, idx)| self.entries[idx].command.clone())
            .collect()
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.len() > 1)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = r#"{
        "ftp": ["ftp -n <ip>", "nmap --script ftp-anon -p 21 <ip>"],
        "port scanning": ["nmap -sV <ip>", "nmap -p- -T4 <ip>"],
        "web": ["gobuster dir -u http://<ip> -w common.txt", "curl -i http://<ip>"]
    }"#;

    #[test]
    fn ranks_by_token_overlap() {
        let index = KeywordIndex::from_json(CORPUS, 2).expect("corpus");
        assert_eq!(index.len(), 6);

        let hits = index.query("Check for anonymous FTP access");
        assert_eq!(hits, vec!["ftp -n <ip>", "nmap --script ftp-anon -p 21 <ip>"]);

        let hits = index.query("Enumerate HTTP service on the web server");
        assert_eq!(hits[0], "gobuster dir -u http://<ip> -w common.txt");
    }

    #[test]
    fn ties_keep_corpus_order_and_k_bounds_results() {
        let index = KeywordIndex::from_json(CORPUS, 3).expect("corpus");
        let hits = index.query("port scanning");
        assert_eq!(hits, vec!["nmap -sV <ip>", "nmap -p- -T4 <ip>"]);

        let index = KeywordIndex::from_json(CORPUS, 1).expect("corpus");
        assert_eq!(index.query("nmap").len(), 1);
    }

    #[test]
    fn no_overlap_yields_nothing() {
        let index = KeywordIndex::from_json(CORPUS, 3).expect("corpus");
        assert!(index.query("zzz").is_empty());
        assert!(index.query("").is_empty());
    }

    #[test]
    fn malformed_corpus_is_an_error() {
        assert!(KeywordIndex::from_json("[\"nmap\"]", 3).is_err());
    }
}

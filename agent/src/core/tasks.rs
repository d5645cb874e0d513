//! Keyword rules that turn discovery summaries into canonical tasks.

/// Summary words that mark a discovery worth turning into follow-up tasks.
const DISCOVERY_WORDS: [&str; 4] = ["discovered", "found", "detected", "identified"];

/// Keyword → canonical task rules. Tasks match the phase goal names.
const TASK_RULES: [(&str, &[&str]); 5] = [
    ("open port", &["Scan open ports for services"]),
    ("http", &["Enumerate HTTP service"]),
    ("ftp", &["Check for anonymous FTP access"]),
    ("ssh", &["Attempt SSH login on target machine"]),
    (
        "flag",
        &[
            "Find file named flag.txt on target machine",
            "Read contents of flag.txt using cat",
        ],
    ),
];

/// Canonical follow-up tasks implied by a summary.
///
/// Only summaries that report a discovery produce tasks; order follows the
/// rule table.
pub fn extract_tasks(summary: &str) -> Vec<String> {
    let lower = summary.to_lowercase();
    if !DISCOVERY_WORDS.iter().any(|word| lower.contains(word)) {
        return Vec::new();
    }
    TASK_RULES
        .iter()
        .filter(|(keyword, _)| lower.contains(keyword))
        .flat_map(|(_, tasks)| tasks.iter().map(|task| task.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::phase::Phase;

    #[test]
    fn no_discovery_word_means_no_tasks() {
        assert!(extract_tasks("Ran nmap against the host, ssh and http seen").is_empty());
    }

    #[test]
    fn extracts_in_rule_order() {
        let tasks = extract_tasks("Discovered open port 22 running SSH and HTTP on 80");
        assert_eq!(
            tasks,
            vec![
                "Scan open ports for services",
                "Enumerate HTTP service",
                "Attempt SSH login on target machine",
            ]
        );
    }

    #[test]
    fn flag_hint_yields_both_exploitation_goals() {
        let tasks = extract_tasks("Found a FLAG hint in the web root");
        assert_eq!(tasks, Phase::Exploitation.goals());
    }
}

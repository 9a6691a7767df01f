//! Prompt-injection scanner.
//!
//! Runs on normalized message text before anything is redacted or sent to
//! the drafting model. Matching is deterministic: case-insensitive phrase
//! and pattern rules from an ordered, versioned catalog. Any match makes
//! the verdict suspicious and the pipeline aborts.

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::safety::normalize::NormalizedText;

/// Bump whenever a rule is added, removed or changed.
pub const THREAT_RULESET_VERSION: &str = "2026.1";

/// Phrases lifted from real injection attempts against email drafting.
const DEFAULT_PHRASES: &[(&str, &str)] = &[
    ("ignore-previous-instructions", "ignore previous instructions"),
    ("ignore-all-instructions", "ignore all instructions"),
    ("ignore-your-instructions", "ignore your instructions"),
    ("forget-your-instructions", "forget your instructions"),
    ("forget-previous-instructions", "forget previous instructions"),
    ("disregard-previous-instructions", "disregard previous instructions"),
    ("you-are-now", "you are now"),
    ("act-as", "act as"),
    ("pretend-you-are", "pretend you are"),
    ("disregard-your", "disregard your"),
    ("override-your", "override your"),
    ("new-instruction", "new instruction"),
    ("system-prompt", "system prompt"),
    ("reveal-your-prompt", "reveal your prompt"),
    ("do-not-follow", "do not follow"),
    ("stop-following", "stop following"),
];

/// A single scanner rule with a compiled, case-insensitive matcher.
#[derive(Debug, Clone)]
pub struct ThreatRule {
    /// Stable identifier reported in verdicts and audit logs.
    pub id: String,
    /// Human-readable description of what the rule catches.
    pub description: String,
    regex: Regex,
}

impl ThreatRule {
    /// Phrase rule: words must appear in order, separated by any whitespace,
    /// on word boundaries.
    pub fn phrase(id: impl Into<String>, phrase: &str) -> Self {
        let words: Vec<String> = phrase.split_whitespace().map(regex::escape).collect();
        let mut pattern = String::from("(?i)");
        if phrase.starts_with(|c: char| c.is_alphanumeric()) {
            pattern.push_str(r"\b");
        }
        pattern.push_str(&words.join(r"\s+"));
        if phrase.ends_with(|c: char| c.is_alphanumeric()) {
            pattern.push_str(r"\b");
        }
        Self {
            id: id.into(),
            description: format!("phrase \"{phrase}\""),
            // Escaped literals joined by \s+ always compile.
            regex: Regex::new(&pattern).unwrap(),
        }
    }

    /// Pattern rule: a regex, matched case-insensitively.
    pub fn pattern(
        id: impl Into<String>,
        description: impl Into<String>,
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            id: id.into(),
            description: description.into(),
            regex: Regex::new(&format!("(?i){pattern}"))?,
        })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Outcome of scanning one piece of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreatVerdict {
    pub is_suspicious: bool,
    /// Ids of the rules that matched, in catalog order.
    pub matched_patterns: Vec<String>,
    pub ruleset_version: &'static str,
}

/// Injection scanner built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ThreatScanner {
    rules: Vec<ThreatRule>,
    version: &'static str,
}

impl ThreatScanner {
    /// Scanner with the built-in catalog.
    pub fn default_rules() -> Self {
        let mut rules: Vec<ThreatRule> = DEFAULT_PHRASES
            .iter()
            .map(|(id, phrase)| ThreatRule::phrase(*id, phrase))
            .collect();

        let patterns = [
            (
                "role-marker",
                "chat role marker at the start of a line",
                r"(?m)^\s*(system|assistant|developer)\s*:",
            ),
            (
                "chat-delimiter",
                "special chat-template token such as <|im_start|>",
                r"<\|\s*[a-z_]+\s*\|>",
            ),
            (
                "inst-delimiter",
                "[INST] instruction delimiter",
                r"\[/?inst\]",
            ),
            (
                "instruction-header",
                "markdown header opening a system/instruction block",
                r"(?m)^#{2,}\s*(system|instructions?)\b",
            ),
        ];
        for (id, description, pattern) in patterns {
            // Built-in patterns are fixed strings covered by tests.
            rules.push(ThreatRule::pattern(id, description, pattern).unwrap());
        }

        Self {
            rules,
            version: THREAT_RULESET_VERSION,
        }
    }

    /// Scanner with a custom catalog (for testing or specialized deployments).
    pub fn with_rules(rules: Vec<ThreatRule>, version: &'static str) -> Self {
        Self { rules, version }
    }

    /// Scanner that never matches (for testing).
    pub fn empty() -> Self {
        Self::with_rules(Vec::new(), "empty")
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    pub fn rule_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.id.as_str())
    }

    /// Scan normalized message text.
    pub fn scan(&self, text: &NormalizedText) -> ThreatVerdict {
        let verdict = self.scan_str(text.as_str());
        if verdict.is_suspicious {
            warn!(
                rules = ?verdict.matched_patterns,
                ruleset = verdict.ruleset_version,
                "Injection rules matched"
            );
        } else {
            debug!(ruleset = verdict.ruleset_version, "Text passed injection scan");
        }
        verdict
    }

    /// Scan arbitrary text, e.g. a generated draft.
    pub fn scan_str(&self, text: &str) -> ThreatVerdict {
        let matched_patterns: Vec<String> = self
            .rules
            .iter()
            .filter(|rule| rule.is_match(text))
            .map(|rule| rule.id.clone())
            .collect();

        ThreatVerdict {
            is_suspicious: !matched_patterns.is_empty(),
            matched_patterns,
            ruleset_version: self.version,
        }
    }
}

impl Default for ThreatScanner {
    fn default() -> Self {
        Self::default_rules()
    }
}

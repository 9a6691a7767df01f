//! PII redaction for text that passed the injection scan.
//!
//! Rules run in a fixed priority order over the progressively masked text.
//! Each match is replaced by a `[REDACTED:<category>]` token. Tokens carry
//! no digits and no `@`, so a span consumed by one rule is never picked up
//! again by a later one, and redacting already-masked text is a no-op.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::safety::normalize::NormalizedText;

/// Bump whenever a rule is added, removed or changed.
pub const REDACTION_RULESET_VERSION: &str = "2026.2";

/// Kind of personally identifying information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiCategory {
    Phone,
    Email,
    Id,
}

impl PiiCategory {
    pub const ALL: [PiiCategory; 3] = [PiiCategory::Phone, PiiCategory::Email, PiiCategory::Id];

    pub fn label(&self) -> &'static str {
        match self {
            PiiCategory::Phone => "phone",
            PiiCategory::Email => "email",
            PiiCategory::Id => "id",
        }
    }

    /// Replacement token written into masked text.
    pub fn token(&self) -> String {
        format!("[REDACTED:{}]", self.label())
    }
}

impl fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One redaction rule in the catalog.
#[derive(Debug, Clone)]
pub struct RedactionRule {
    /// Stable identifier, e.g. `phone-nanp`.
    pub id: String,
    pub category: PiiCategory,
    regex: Regex,
}

impl RedactionRule {
    pub fn new(
        id: impl Into<String>,
        category: PiiCategory,
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            id: id.into(),
            category,
            regex: Regex::new(pattern)?,
        })
    }
}

/// Number of replacements made per category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedactionCounts(BTreeMap<PiiCategory, usize>);

impl RedactionCounts {
    pub fn get(&self, category: PiiCategory) -> usize {
        self.0.get(&category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (PiiCategory, usize)> + '_ {
        self.0.iter().map(|(c, n)| (*c, *n))
    }

    /// Add another result's counts into this one.
    pub fn merge(&mut self, other: &RedactionCounts) {
        for (category, n) in other.iter() {
            *self.0.entry(category).or_insert(0) += n;
        }
    }

    fn add(&mut self, category: PiiCategory, n: usize) {
        *self.0.entry(category).or_insert(0) += n;
    }

    /// Note for the drafting model listing which fields were masked, or
    /// `None` when nothing was.
    pub fn notice(&self) -> Option<String> {
        let tokens: Vec<String> = self
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(c, _)| c.token())
            .collect();
        if tokens.is_empty() {
            return None;
        }
        Some(format!(
            "[Note: The following sensitive fields were redacted before processing: {}]",
            tokens.join(", ")
        ))
    }
}

impl Default for RedactionCounts {
    fn default() -> Self {
        Self(PiiCategory::ALL.iter().map(|c| (*c, 0)).collect())
    }
}

/// Masked text plus per-category counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionResult {
    pub masked_text: String,
    pub counts: RedactionCounts,
}

/// PII redactor built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Redactor {
    rules: Vec<RedactionRule>,
    version: &'static str,
}

impl Redactor {
    /// Redactor with the built-in catalog, in priority order.
    pub fn default_rules() -> Self {
        let catalog = [
            (
                "email",
                PiiCategory::Email,
                r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b",
            ),
            // 4-4-4-(1..7) groups, or a bare run of 13–19 digits.
            (
                "card-number",
                PiiCategory::Id,
                r"\b(?:\d{4}[ \-]){3}\d{1,7}\b|\b\d{13,19}\b",
            ),
            (
                "phone-il",
                PiiCategory::Phone,
                r"(?:\+972[\-\s]?|\b0)(?:[23489]|5\d|7\d)[\-\s]?\d{3}[\-\s]?\d{4}\b",
            ),
            (
                "phone-nanp",
                PiiCategory::Phone,
                r"(?:\+1[\-.\s]?)?(?:\(\d{3}\)\s?|\b\d{3}[\-.\s]?)\d{3}[\-.\s]?\d{4}\b",
            ),
            // Any other number written with a `+` or `00` country prefix.
            (
                "phone-intl",
                PiiCategory::Phone,
                r"(?:\+|\b00)\d{1,3}[\-.\s]?\(?\d{1,4}\)?(?:[\-.\s]?\d{2,4}){2,5}\b",
            ),
            ("numeric-id", PiiCategory::Id, r"\b\d{6,}\b"),
        ];

        let rules = catalog
            .into_iter()
            // Built-in patterns are fixed strings covered by tests.
            .map(|(id, category, pattern)| RedactionRule::new(id, category, pattern).unwrap())
            .collect();

        Self {
            rules,
            version: REDACTION_RULESET_VERSION,
        }
    }

    /// Redactor with a custom catalog, applied in the given order.
    pub fn with_rules(rules: Vec<RedactionRule>, version: &'static str) -> Self {
        Self { rules, version }
    }

    pub fn version(&self) -> &'static str {
        self.version
    }

    /// Redact normalized text.
    pub fn redact(&self, text: &NormalizedText) -> RedactionResult {
        let result = self.redact_str(text.as_str());
        if !result.counts.is_empty() {
            debug!(
                phone = result.counts.get(PiiCategory::Phone),
                email = result.counts.get(PiiCategory::Email),
                id = result.counts.get(PiiCategory::Id),
                ruleset = self.version,
                "Redacted PII"
            );
        }
        result
    }

    /// Redact arbitrary text.
    pub fn redact_str(&self, text: &str) -> RedactionResult {
        let mut masked = text.to_string();
        let mut counts = RedactionCounts::default();

        for rule in &self.rules {
            let mut hits = 0;
            let token = rule.category.token();
            let replaced = rule.regex.replace_all(&masked, |_: &regex::Captures| {
                hits += 1;
                token.clone()
            });
            if hits > 0 {
                masked = replaced.into_owned();
                counts.add(rule.category, hits);
            }
        }

        RedactionResult {
            masked_text: masked,
            counts,
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::default_rules()
    }
}

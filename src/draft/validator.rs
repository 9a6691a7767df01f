//! Draft validator: structural checks on generated text before a human
//! ever sees it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::safety::ThreatScanner;

use super::invoker::DraftCandidate;
use super::prompt::DRAFT_MARKER;

/// Template fields: `{name}`, `[UPPER_CASE]`, `<UPPER_CASE>`.
static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]+\}|\[[A-Z][A-Z0-9_]+\]|<[A-Z][A-Z0-9_]+>").unwrap());

/// Markers the model leaves when it could not answer something itself.
static ANSWER_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[(?:answer needed|response needed|todo|fill in)[^\]]*\]").unwrap()
});

static REDACTION_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[REDACTED:[a-z_]+\]").unwrap());

/// Kind of structural defect, without detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectKind {
    UnfilledPlaceholder,
    EchoedMarker,
    TooShort,
    TooLong,
}

/// A structural defect found in a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DraftDefect {
    UnfilledPlaceholder { tokens: Vec<String> },
    EchoedMarker { markers: Vec<String> },
    TooShort { len: usize, min: usize },
    TooLong { len: usize, max: usize },
}

impl DraftDefect {
    pub fn kind(&self) -> DefectKind {
        match self {
            DraftDefect::UnfilledPlaceholder { .. } => DefectKind::UnfilledPlaceholder,
            DraftDefect::EchoedMarker { .. } => DefectKind::EchoedMarker,
            DraftDefect::TooShort { .. } => DefectKind::TooShort,
            DraftDefect::TooLong { .. } => DefectKind::TooLong,
        }
    }
}

impl fmt::Display for DraftDefect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DraftDefect::UnfilledPlaceholder { tokens } => {
                write!(f, "unfilled placeholders: {}", tokens.join(", "))
            }
            DraftDefect::EchoedMarker { markers } => {
                write!(f, "echoed markers: {}", markers.join(", "))
            }
            DraftDefect::TooShort { len, min } => {
                write!(f, "too short: {len} chars (min {min})")
            }
            DraftDefect::TooLong { len, max } => write!(f, "too long: {len} chars (max {max})"),
        }
    }
}

/// Validator thresholds.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Minimum draft length in characters, after trimming.
    pub min_chars: usize,
    /// Maximum draft length in characters, after trimming.
    pub max_chars: usize,
    /// Word count above which a warning is attached.
    pub long_words: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_chars: 20,
            max_chars: 4000,
            long_words: 300,
        }
    }
}

/// Outcome of validating one candidate.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub accepted: bool,
    /// The extracted draft the checks ran on.
    pub draft: String,
    pub defects: Vec<DraftDefect>,
    /// Non-blocking notes, e.g. a very long draft.
    pub warnings: Vec<String>,
}

/// Take the draft out of a model response.
///
/// When the response wraps the draft in `---` markers the text between the
/// first pair is used; otherwise the whole response, trimmed.
pub fn extract_draft(response: &str) -> &str {
    let mut parts = response.split(DRAFT_MARKER);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(inner), Some(_)) if !inner.trim().is_empty() => inner.trim(),
        _ => response.trim(),
    }
}

/// Checks generated drafts. Pure and deterministic.
#[derive(Debug, Clone, Default)]
pub struct DraftValidator {
    config: ValidatorConfig,
    scanner: ThreatScanner,
}

impl DraftValidator {
    pub fn new(config: ValidatorConfig, scanner: ThreatScanner) -> Self {
        Self { config, scanner }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate a candidate. `expected_fills` names template fields the
    /// model was supposed to replace with real values.
    pub fn validate(
        &self,
        candidate: &DraftCandidate,
        expected_fills: &BTreeSet<String>,
    ) -> ValidationResult {
        let draft = extract_draft(&candidate.raw_text);
        let mut defects = Vec::new();
        let mut warnings = Vec::new();

        let tokens = unfilled_placeholders(draft, expected_fills);
        if !tokens.is_empty() {
            defects.push(DraftDefect::UnfilledPlaceholder { tokens });
        }

        let mut markers: Vec<String> = REDACTION_TOKEN_RE
            .find_iter(draft)
            .map(|m| m.as_str().to_string())
            .collect();
        markers.extend(self.scanner.scan_str(draft).matched_patterns);
        if !markers.is_empty() {
            dedup_in_order(&mut markers);
            defects.push(DraftDefect::EchoedMarker { markers });
        }

        let len = draft.chars().count();
        if len < self.config.min_chars {
            defects.push(DraftDefect::TooShort {
                len,
                min: self.config.min_chars,
            });
        } else if len > self.config.max_chars {
            defects.push(DraftDefect::TooLong {
                len,
                max: self.config.max_chars,
            });
        }

        let words = draft.split_whitespace().count();
        if words > self.config.long_words {
            warnings.push(format!(
                "draft is {words} words long (over {})",
                self.config.long_words
            ));
        }

        debug!(
            attempt = candidate.attempt,
            defects = defects.len(),
            warnings = warnings.len(),
            "Draft validated"
        );

        ValidationResult {
            accepted: defects.is_empty(),
            draft: draft.to_string(),
            defects,
            warnings,
        }
    }
}

fn unfilled_placeholders(draft: &str, expected_fills: &BTreeSet<String>) -> Vec<String> {
    let mut tokens: Vec<String> = PLACEHOLDER_RE
        .find_iter(draft)
        .chain(ANSWER_MARKER_RE.find_iter(draft))
        .map(|m| m.as_str().to_string())
        .collect();

    let lower = draft.to_lowercase();
    for field in expected_fills {
        let field = field.to_lowercase();
        for (open, close) in [("{", "}"), ("[", "]"), ("<", ">")] {
            let bracketed = format!("{open}{field}{close}");
            if lower.contains(&bracketed) && !tokens.iter().any(|t| t.to_lowercase().contains(&bracketed)) {
                tokens.push(bracketed);
            }
        }
    }

    dedup_in_order(&mut tokens);
    tokens
}

fn dedup_in_order(items: &mut Vec<String>) {
    let mut seen = BTreeSet::new();
    items.retain(|item| seen.insert(item.clone()));
}

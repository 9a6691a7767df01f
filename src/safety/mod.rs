//! Safety layer — everything untrusted text passes through before it
//! reaches the drafting model.
//!
//! Order is fixed: normalize → injection scan (hard gate) → PII redaction.

pub mod normalize;
pub mod redact;
pub mod threat;

pub use normalize::{NormalizedText, normalize};
pub use redact::{PiiCategory, RedactionCounts, RedactionResult, RedactionRule, Redactor};
pub use threat::{ThreatRule, ThreatScanner, ThreatVerdict};

use crate::error::SecurityRejection;

/// Scanner and redactor, built once and shared read-only by the pipeline.
#[derive(Debug, Clone, Default)]
pub struct SafetyLayer {
    scanner: ThreatScanner,
    redactor: Redactor,
}

impl SafetyLayer {
    /// Create a safety layer with the built-in rule catalogs.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parts(scanner: ThreatScanner, redactor: Redactor) -> Self {
        Self { scanner, redactor }
    }

    pub fn scanner(&self) -> &ThreatScanner {
        &self.scanner
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Normalize and scan one piece of untrusted text.
    ///
    /// `message_index` identifies the message in the thread for the
    /// rejection report.
    pub fn screen(
        &self,
        raw: &str,
        message_index: usize,
    ) -> Result<NormalizedText, SecurityRejection> {
        let text = normalize(raw);
        let verdict = self.scanner.scan(&text);
        if verdict.is_suspicious {
            return Err(SecurityRejection {
                matched_patterns: verdict.matched_patterns,
                ruleset_version: verdict.ruleset_version,
                message_index,
            });
        }
        Ok(text)
    }

    /// Full sanitization of one body: normalize, scan, redact.
    pub fn sanitize(
        &self,
        raw: &str,
        message_index: usize,
    ) -> Result<RedactionResult, SecurityRejection> {
        let text = self.screen(raw, message_index)?;
        Ok(self.redactor.redact(&text))
    }
}

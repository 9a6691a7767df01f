//! End-to-end drafting pipeline.
//!
//! Every thread flows through:
//! 1. `classify()` — reply vs follow-up, already-replied flag
//! 2. `SafetyLayer::screen()` — normalization and the injection gate
//! 3. `Redactor::redact()` — PII masking
//! 4. `DraftInvoker::invoke()` — bounded model call
//! 5. `DraftValidator::validate()` — structural checks
//!
//! **No send path exists.** The output is a draft for human review.

pub mod processor;

pub use processor::{AcceptedDraft, DraftPipeline};

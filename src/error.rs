//! Error types for draft-guard.

use std::time::Duration;

use crate::draft::validator::{DefectKind, DraftDefect};

/// Top-level error type for the drafting pipeline.
///
/// Each variant is a distinct abort reason the mailbox collaborator can
/// present to the user. Only `Validation` is recoverable.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Security rejection: {0}")]
    Security(#[from] SecurityRejection),

    #[error("Invocation failure: {0}")]
    Invocation(#[from] InvocationFailure),

    #[error("Validation failure: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// A human can act on this error (edit the draft, request regeneration).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    /// Short label for logs and the CLI.
    pub fn label(&self) -> &'static str {
        match self {
            Error::Input(_) => "input_error",
            Error::Security(_) => "security_rejection",
            Error::Invocation(_) => "invocation_failure",
            Error::Validation(_) => "validation_failure",
            Error::Config(_) => "config_error",
        }
    }
}

/// Malformed thread or identity handed in by the collaborator.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("Thread contains no messages")]
    EmptyThread,

    #[error("Self identity is empty")]
    MissingIdentity,

    #[error("Message {index} has an empty body")]
    EmptyBody { index: usize },

    #[error("Failed to read thread: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The threat scanner flagged the thread. No redaction or generation ran.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "message {message_index} matched injection rules [{}] (ruleset {ruleset_version})",
    .matched_patterns.join(", ")
)]
pub struct SecurityRejection {
    /// Rule ids that matched, in catalog order.
    pub matched_patterns: Vec<String>,
    pub ruleset_version: &'static str,
    /// Position of the offending message in the thread.
    pub message_index: usize,
}

/// The drafting call could not produce a candidate.
#[derive(Debug, thiserror::Error)]
#[error("draft generation failed after {attempts_made} attempt(s): {last_error}")]
pub struct InvocationFailure {
    pub last_error: LlmError,
    /// Zero when the request was rejected before any call was made.
    pub attempts_made: u32,
}

/// The generated draft has structural defects.
#[derive(Debug, Clone, thiserror::Error)]
#[error("draft rejected: {}", describe_defects(.defects))]
pub struct ValidationFailure {
    /// The extracted draft, kept so a human can edit it.
    pub draft: String,
    pub defects: Vec<DraftDefect>,
}

impl ValidationFailure {
    pub fn has(&self, kind: DefectKind) -> bool {
        self.defects.iter().any(|d| d.kind() == kind)
    }
}

fn describe_defects(defects: &[DraftDefect]) -> String {
    defects
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider {provider} server error (status {status})")]
    ServerError { provider: String, status: u16 },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    /// Transient failures are worth another attempt; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::RequestFailed { .. }
                | LlmError::Timeout { .. }
                | LlmError::RateLimited { .. }
                | LlmError::ServerError { .. }
        )
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;

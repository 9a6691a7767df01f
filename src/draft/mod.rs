//! Drafting: thread classification, request assembly, the model call and
//! validation of what comes back.

pub mod context;
pub mod invoker;
pub mod prompt;
pub mod validator;

pub use context::{ThreadContext, ThreadRole, classify};
pub use invoker::{DraftCandidate, DraftInvoker, InvokerConfig};
pub use prompt::{GenerationRequest, build_request};
pub use validator::{
    DefectKind, DraftDefect, DraftValidator, ValidationResult, ValidatorConfig, extract_draft,
};

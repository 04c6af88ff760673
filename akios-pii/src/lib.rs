//! PII detection and redaction for agent step parameters and results.
//!
//! Detection runs a curated pattern pack against text, resolves overlapping
//! matches by priority, and hands the resulting spans to the redactor.
//! Detection and redaction never panic: any internal failure degrades to a
//! mask-everything policy rather than letting raw PII through silently.

mod rules;
mod validators;
mod detect;
mod redact;

pub use detect::{PiiDetector, PiiMatch};
pub use redact::{redact, redact_filtered, RedactionStrategy};
pub use rules::{all_patterns, Category, Sensitivity};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PiiError {
    #[error("pii pattern pack failed to initialize: {0}")]
    PackInit(String),
}

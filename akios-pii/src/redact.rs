//! Redaction: applies the overlap-resolved spans from [`crate::PiiDetector`]
//! as either a deterministic placeholder, a joinable hash, or a deletion.

use sha2::{Digest, Sha256};

use crate::detect::PiiDetector;
use crate::rules::{Category, Sensitivity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionStrategy {
    Mask,
    Hash,
    Remove,
}

/// Redacts all PII detected in `text`, consuming the detector's
/// overlap-resolved spans left-to-right.
pub fn redact(text: &str, strategy: RedactionStrategy) -> String {
    redact_filtered(text, strategy, &[], &[], false)
}

pub fn redact_filtered(
    text: &str,
    strategy: RedactionStrategy,
    categories: &[Category],
    sensitivities: &[Sensitivity],
    force: bool,
) -> String {
    let spans = match PiiDetector::detect_spans(text, categories, sensitivities, force) {
        Ok(spans) => spans,
        Err(_) => return "[PII_REDACTION_UNAVAILABLE]".to_string(),
    };

    if spans.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for span in spans {
        if span.start < cursor {
            continue; // defensive: spans are expected non-overlapping post-resolution
        }
        out.push_str(&text[cursor..span.start]);
        out.push_str(&placeholder_for(span.pattern, &span.value, strategy));
        cursor = span.end;
    }
    out.push_str(&text[cursor..]);

    if strategy == RedactionStrategy::Remove {
        collapse_whitespace(&out)
    } else {
        out
    }
}

fn placeholder_for(pattern_name: &str, value: &str, strategy: RedactionStrategy) -> String {
    match strategy {
        RedactionStrategy::Remove => String::new(),
        RedactionStrategy::Mask => mask_placeholder(pattern_name),
        RedactionStrategy::Hash => {
            let digest = hex::encode(Sha256::digest(value.as_bytes()));
            format!("[{}:{}]", pattern_name.to_uppercase(), &digest[..8])
        }
    }
}

fn mask_placeholder(pattern_name: &str) -> String {
    match pattern_name {
        "email" => "[EMAIL]".to_string(),
        "phone_us" | "phone_intl" => "[PHONE]".to_string(),
        "ssn" => "[SSN]".to_string(),
        other => format!("[{}]", other.to_uppercase()),
    }
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_email_with_shared_placeholder() {
        let out = redact("email me: jane.doe@example.com", RedactionStrategy::Mask);
        assert_eq!(out, "email me: [EMAIL]");
    }

    #[test]
    fn redaction_is_idempotent_under_mask() {
        let once = redact("jane.doe@example.com", RedactionStrategy::Mask);
        let twice = redact(&once, RedactionStrategy::Mask);
        assert_eq!(once, twice);
    }

    #[test]
    fn hash_strategy_is_deterministic() {
        let a = redact("jane.doe@example.com", RedactionStrategy::Hash);
        let b = redact("jane.doe@example.com", RedactionStrategy::Hash);
        assert_eq!(a, b);
        assert!(a.starts_with("[EMAIL:"));
    }

    #[test]
    fn remove_strategy_deletes_span() {
        let out = redact("contact jane.doe@example.com now", RedactionStrategy::Remove);
        assert!(!out.contains('@'));
    }
}

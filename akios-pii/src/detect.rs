//! Detection: pattern scan, context gating, validation, overlap resolution.
//!
//! Ported from `RegexPIIDetector.detect_pii` / `_resolve_overlaps` in
//! the original Python implementation.

use std::collections::{BTreeMap, HashSet};

use crate::rules::{all_patterns, Category, CompiledPattern, Sensitivity};
use crate::PiiError;

const CONTEXT_WINDOW: usize = 100;

#[derive(Debug, Clone)]
pub struct PiiMatch {
    pub pattern: &'static str,
    pub category: Category,
    pub sensitivity: Sensitivity,
    pub priority: i32,
    pub start: usize,
    pub end: usize,
    pub value: String,
}

pub struct PiiDetector;

impl PiiDetector {
    /// Detects PII in `text`, filtered to the given categories/sensitivities
    /// (empty slices mean "no filter"). Returns pattern name -> matched
    /// values, grouped the way the caller (redactor) expects.
    ///
    /// On pattern-pack initialization failure, degrades to a single
    /// `"unavailable"` entry spanning the whole text rather than silently
    /// returning no matches.
    pub fn detect(
        text: &str,
        categories: &[Category],
        sensitivities: &[Sensitivity],
        force: bool,
    ) -> BTreeMap<String, Vec<String>> {
        match Self::detect_spans(text, categories, sensitivities, force) {
            Ok(spans) => {
                let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
                for m in spans {
                    grouped.entry(m.pattern.to_string()).or_default().push(m.value);
                }
                grouped
            }
            Err(_) => {
                let mut fallback = BTreeMap::new();
                fallback.insert("unavailable".to_string(), vec![text.to_string()]);
                fallback
            }
        }
    }

    /// Same as [`Self::detect`] but returns the overlap-resolved spans
    /// themselves, for callers (the redactor) that need offsets.
    pub fn detect_spans(
        text: &str,
        categories: &[Category],
        sensitivities: &[Sensitivity],
        force: bool,
    ) -> Result<Vec<PiiMatch>, PiiError> {
        let patterns = all_patterns()?;
        let mut candidates: Vec<PiiMatch> = Vec::new();

        for pattern in patterns {
            if !force {
                if !categories.is_empty() && !categories.contains(&pattern.category) {
                    continue;
                }
                if !sensitivities.is_empty() && !sensitivities.contains(&pattern.sensitivity) {
                    continue;
                }
            }

            for m in pattern.regex.find_iter(text) {
                let value = m.as_str();
                if !Self::context_gate(text, pattern, m.start(), m.end()) {
                    continue;
                }
                if let Some(validator) = pattern.validator {
                    if !validator(value) {
                        continue;
                    }
                }
                candidates.push(PiiMatch {
                    pattern: pattern.name,
                    category: pattern.category,
                    sensitivity: pattern.sensitivity,
                    priority: pattern.priority,
                    start: m.start(),
                    end: m.end(),
                    value: value.to_string(),
                });
            }
        }

        Ok(Self::resolve_overlaps(candidates))
    }

    fn context_gate(text: &str, pattern: &CompiledPattern, start: usize, end: usize) -> bool {
        let Some(keywords) = pattern.context_keywords else {
            return true;
        };
        let window_start = floor_char_boundary(text, start.saturating_sub(CONTEXT_WINDOW));
        let window_end = ceil_char_boundary(text, (end + CONTEXT_WINDOW).min(text.len()));
        let window = text[window_start..window_end].to_lowercase();
        keywords.iter().any(|kw| window.contains(&kw.to_lowercase()))
    }

    /// Sort by (start asc, priority desc, end asc); walk in order, keeping
    /// higher-priority spans and suppressing lower-or-equal-priority
    /// overlaps (equal priority: first-seen wins).
    fn resolve_overlaps(mut candidates: Vec<PiiMatch>) -> Vec<PiiMatch> {
        candidates.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then(b.priority.cmp(&a.priority))
                .then(a.end.cmp(&b.end))
        });

        let mut kept: Vec<PiiMatch> = Vec::new();
        for candidate in candidates {
            let mut suppressed = false;
            let mut replace_index: Option<usize> = None;

            for (i, existing) in kept.iter().enumerate() {
                if candidate.start < existing.end && existing.start < candidate.end {
                    if candidate.priority > existing.priority {
                        replace_index = Some(i);
                    } else {
                        suppressed = true;
                    }
                    break;
                }
            }

            if suppressed {
                continue;
            }
            if let Some(i) = replace_index {
                kept[i] = candidate;
            } else {
                kept.push(candidate);
            }
        }

        kept.sort_by_key(|m| m.start);
        Self::dedup_preserve_order(kept)
    }

    fn dedup_preserve_order(matches: Vec<PiiMatch>) -> Vec<PiiMatch> {
        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        matches
            .into_iter()
            .filter(|m| seen.insert((m.start, m.end)))
            .collect()
    }
}

/// Largest char boundary `<= i`. `i` may be past `text.len()`.
fn floor_char_boundary(text: &str, i: usize) -> usize {
    let mut i = i.min(text.len());
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary `>= i`, capped at `text.len()`.
fn ceil_char_boundary(text: &str, i: usize) -> usize {
    let mut i = i.min(text.len());
    while i < text.len() && !text.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_email() {
        let spans = PiiDetector::detect_spans("contact me at jane.doe@example.com", &[], &[], true).unwrap();
        assert!(spans.iter().any(|m| m.pattern == "email"));
    }

    #[test]
    fn gated_pattern_requires_context_keyword() {
        let without_ctx = PiiDetector::detect_spans("my number is 123456789", &[], &[], true).unwrap();
        assert!(!without_ctx.iter().any(|m| m.pattern == "routing_number"));

        let with_ctx =
            PiiDetector::detect_spans("routing number: 123456789", &[], &[], true).unwrap();
        assert!(with_ctx.iter().any(|m| m.pattern == "routing_number"));
    }

    #[test]
    fn overlap_resolution_keeps_higher_priority() {
        // ssn (priority 95) should win over a lower-priority numeric overlap.
        let spans = PiiDetector::detect_spans("ssn 123-45-6789 on file", &[], &[], true).unwrap();
        let overlapping: Vec<_> = spans
            .iter()
            .filter(|m| m.start < 15 && m.end > 4)
            .collect();
        assert!(overlapping.iter().any(|m| m.pattern == "ssn"));
        assert_eq!(overlapping.len(), 1, "overlapping lower-priority span should be suppressed");
    }
}

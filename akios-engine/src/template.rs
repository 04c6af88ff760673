//! Output extraction and template substitution.
//!
//! `extract_output_value` is ported verbatim (key order, truncation,
//! filesystem-write special case) from `output_extractor.py`'s
//! `OUTPUT_KEY_ORDER`. It is the sole implementation of the probe: the
//! condition evaluator's namespace builder and template substitution both
//! call through this one function rather than re-implementing the order.

use thiserror::Error;

use crate::model::Value;

const OUTPUT_KEY_ORDER: [&str; 7] = ["text", "content", "output", "result", "response", "stdout", "data"];
const MAX_OUTPUT_LENGTH: usize = 2000;
const MAX_SUBSTITUTION_DEPTH: u32 = 10;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template references unset environment variable '{0}'")]
    MissingEnvVar(String),
    #[error("template substitution exceeded the maximum depth of {MAX_SUBSTITUTION_DEPTH}")]
    TooDeep,
}

pub fn extract_output_value(value: &Value) -> String {
    let Some(map) = value.as_map() else {
        return truncate(&value.display_string());
    };

    for key in OUTPUT_KEY_ORDER {
        if let Some(v) = map.get(key) {
            if !v.is_null() {
                return truncate(&v.display_string());
            }
        }
    }

    if let Some(Value::Bool(true)) = map.get("written") {
        let path = map.get("path").map(|v| v.display_string()).unwrap_or_else(|| "?".to_string());
        let size = map.get("size").map(|v| v.display_string()).unwrap_or_else(|| "?".to_string());
        return format!("Written to {path} ({size} bytes)");
    }

    let summary: Vec<String> = map
        .iter()
        .filter(|(k, _)| k.as_str() != "cost_incurred")
        .map(|(k, v)| format!("{k}: {}", v.display_string()))
        .collect();
    if summary.is_empty() {
        String::new()
    } else {
        truncate(&summary.join(", "))
    }
}

fn truncate(s: &str) -> String {
    if s.chars().count() <= MAX_OUTPUT_LENGTH {
        s.to_string()
    } else {
        s.chars().take(MAX_OUTPUT_LENGTH).collect()
    }
}

/// Renders `{previous_output}`, `{step_K_output}`, and `${ENV_VAR}` tokens,
/// re-scanning the result up to [`MAX_SUBSTITUTION_DEPTH`] times so nested
/// substitutions resolve without allowing runaway expansion.
pub fn render(
    template: &str,
    previous_output: Option<&str>,
    step_outputs: &std::collections::BTreeMap<u32, String>,
) -> Result<String, TemplateError> {
    let mut current = template.to_string();
    for _ in 0..MAX_SUBSTITUTION_DEPTH {
        let next = substitute_once(&current, previous_output, step_outputs)?;
        if next == current {
            return Ok(next);
        }
        current = next;
    }
    Err(TemplateError::TooDeep)
}

fn substitute_once(
    template: &str,
    previous_output: Option<&str>,
    step_outputs: &std::collections::BTreeMap<u32, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '{' {
            if let Some(end) = template[i..].find('}') {
                let token = &template[i + 1..i + end];
                if token == "previous_output" {
                    out.push_str(previous_output.unwrap_or(""));
                } else if let Some(step) = token.strip_prefix("step_").and_then(|s| s.strip_suffix("_output")) {
                    if let Ok(n) = step.parse::<u32>() {
                        out.push_str(step_outputs.get(&n).map(String::as_str).unwrap_or(""));
                    } else {
                        out.push('{');
                        out.push_str(token);
                        out.push('}');
                    }
                } else {
                    out.push('{');
                    out.push_str(token);
                    out.push('}');
                }
                for _ in 0..end {
                    chars.next();
                }
                continue;
            }
        }
        if c == '$' {
            if let Some(&(_, '{')) = chars.peek() {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for (_, c2) in chars.by_ref() {
                    if c2 == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c2);
                }
                if !closed {
                    return Err(TemplateError::MissingEnvVar("<unterminated ${...} token>".to_string()));
                }
                match std::env::var(&name) {
                    Ok(v) => out.push_str(&v),
                    Err(_) => return Err(TemplateError::MissingEnvVar(name)),
                }
                continue;
            }
        }
        out.push(c);
    }
    Ok(out)
}

/// Rewrites a relative `data/output/...` path into the per-run directory.
pub fn remap_output_path(path: &str, workflow_id: &str) -> String {
    match path.strip_prefix("data/output/") {
        Some(rest) => format!("data/output/run_{workflow_id}/{rest}"),
        None => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn extract_prefers_text_key() {
        let mut map = BTreeMap::new();
        map.insert("text".to_string(), Value::String("hi".into()));
        map.insert("content".to_string(), Value::String("ignored".into()));
        assert_eq!(extract_output_value(&Value::Map(map)), "hi");
    }

    #[test]
    fn extract_falls_back_to_written_summary() {
        let mut map = BTreeMap::new();
        map.insert("written".to_string(), Value::Bool(true));
        map.insert("path".to_string(), Value::String("out.txt".into()));
        map.insert("size".to_string(), Value::Int(42));
        assert_eq!(extract_output_value(&Value::Map(map)), "Written to out.txt (42 bytes)");
    }

    #[test]
    fn render_substitutes_previous_output_and_step_output() {
        let mut steps = BTreeMap::new();
        steps.insert(0, "zero".to_string());
        let rendered = render("{previous_output} / {step_0_output}", Some("prev"), &steps).unwrap();
        assert_eq!(rendered, "prev / zero");
    }

    #[test]
    fn render_errors_on_missing_env_var() {
        std::env::remove_var("AKIOS_TEST_MISSING_VAR");
        let result = render("${AKIOS_TEST_MISSING_VAR}", None, &BTreeMap::new());
        assert!(matches!(result, Err(TemplateError::MissingEnvVar(_))));
    }

    #[test]
    fn remap_prefixes_run_directory() {
        assert_eq!(remap_output_path("data/output/result.txt", "demo_1"), "data/output/run_demo_1/result.txt");
    }
}

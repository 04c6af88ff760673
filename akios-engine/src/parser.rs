//! Workflow YAML parsing with a structural pre-pass that rejects forbidden
//! parallel/loop constructs anywhere in a step's `parameters` or `config`.
//!
//! Ported from `RuntimeEngine._validate_workflow_structure`'s recursive
//! dict/list key scan.

use thiserror::Error;

use crate::model::Workflow;

const FORBIDDEN_KEYS: &[&str] = &["parallel", "parallel_steps", "loop", "for_each", "map", "reduce"];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("workflow yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("workflow contains forbidden parallel/loop construct: key '{0}' found under step {1}")]
    ForbiddenConstruct(String, u32),
    #[error("workflow has no steps")]
    Empty,
}

pub fn parse(yaml: &str) -> Result<Workflow, ParseError> {
    let raw: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    check_forbidden(&raw)?;

    let workflow: Workflow = serde_yaml::from_value(raw)?;
    if workflow.steps.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(workflow)
}

fn check_forbidden(root: &serde_yaml::Value) -> Result<(), ParseError> {
    let Some(steps) = root.get("steps").and_then(|s| s.as_sequence()) else {
        return Ok(());
    };
    for step in steps {
        let step_id = step.get("step_id").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        if let Some(params) = step.get("parameters") {
            walk(params, step_id)?;
        }
        if let Some(config) = step.get("config") {
            walk(config, step_id)?;
        }
    }
    Ok(())
}

fn walk(value: &serde_yaml::Value, step_id: u32) -> Result<(), ParseError> {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                if let Some(key_str) = k.as_str() {
                    if FORBIDDEN_KEYS.contains(&key_str.to_lowercase().as_str()) {
                        return Err(ParseError::ForbiddenConstruct(key_str.to_string(), step_id));
                    }
                }
                walk(v, step_id)?;
            }
            Ok(())
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                walk(item, step_id)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_workflow() {
        let yaml = r#"
name: demo
steps:
  - step_id: 0
    agent: filesystem
    action: read
    parameters:
      path: data/input/a.txt
"#;
        let workflow = parse(yaml).unwrap();
        assert_eq!(workflow.steps.len(), 1);
    }

    #[test]
    fn rejects_forbidden_parallel_key() {
        let yaml = r#"
name: demo
steps:
  - step_id: 0
    agent: filesystem
    action: read
    parameters:
      parallel_steps: [1, 2]
"#;
        assert!(matches!(parse(yaml), Err(ParseError::ForbiddenConstruct(..))));
    }

    #[test]
    fn rejects_forbidden_key_nested_in_config() {
        let yaml = r#"
name: demo
steps:
  - step_id: 0
    agent: filesystem
    action: read
    config:
      retry:
        for_each: [1, 2, 3]
"#;
        assert!(matches!(parse(yaml), Err(ParseError::ForbiddenConstruct(..))));
    }

    #[test]
    fn rejects_empty_workflow() {
        let yaml = "name: demo\nsteps: []\n";
        assert!(matches!(parse(yaml), Err(ParseError::Empty)));
    }
}
